pub mod room;
pub mod session;
pub mod signaling;

pub use room::{ConnId, ParticipantInfo, RoomType};
pub use session::{is_initiator, CallState, SessionEvent};
pub use signaling::{ClientEvent, ClientFrame, Response, ServerEvent, ServerFrame};
