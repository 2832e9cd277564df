//! Real-Time Broadcast Plane
//!
//! Producer path: the trading service publishes typed frames to the
//! market's Redis topic; every instance's bus bridge relays them into the
//! local hub; SSE subscribers drain per-milestone lossy channels.

mod hub;
mod messages;
mod sse;

pub use hub::BroadcastHub;
pub use messages::BroadcastMessage;
pub use sse::milestone_stream;
