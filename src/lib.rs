//! An eventually-stable leader election service implementing the Aguilera et
//! al. family of algorithms: a non-stable baseline over reliable links, a
//! stable variant over reliable links, an O(n)-election-time stable variant
//! tolerant of lossy links via expiring-links clock estimation, and an
//! O(1)-election-time stable variant with bounded latency via `Alert`
//! broadcasts.
//!
//! The four variants are one [`Algorithm`] choice on [`ElectorConfig`], not
//! four separate types: they share a membership table, a round/leader state
//! machine, and a message algebra, differing only in which handler branches
//! run and which optional message fields get filled in.

mod address;
mod elector;
mod error;
mod membership;
mod message;
mod observer;
mod timing;
mod transport;

pub use address::{PeerAddress, ProcessIndex};
pub use elector::{Algorithm, Elector, ElectorConfig};
pub use error::{ElectorError, Result};
pub use message::{Message, TimingEstimate};
pub use observer::{LeaderView, NullObserver, Observer};
pub use timing::{PeerTiming, Stat};
pub use transport::{ChannelSwitch, ChannelTransport, Transport, UdpTransport};
