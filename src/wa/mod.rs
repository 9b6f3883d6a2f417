pub mod events;
pub mod jid;
pub mod message;
pub mod qr;
pub mod socket;

pub use events::{
    CloseClass,
    ConnectionPhase,
    ConnectionUpdate,
    DisconnectInfo,
    WaEvent,
    WaUser,
    classify_close,
    close_code,
};
pub use message::{
    MediaKind,
    MediaSource,
    MessageKey,
    MessageStatus,
    OutboundContent,
    SendAction,
    SendReceipt,
    generate_message_id,
};
pub use socket::{
    PresenceKind,
    SocketOptions,
    StubWaSocketFactory,
    WaError,
    WaSocket,
    WaSocketFactory,
};
