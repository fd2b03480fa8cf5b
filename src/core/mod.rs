pub mod media;
pub mod realtime;
pub mod tools;
pub mod turn;

// Re-export commonly used types for convenience
pub use media::{
    AudioBuffer, AudioSink, CaptureControl, CapturePipeline, MediaBlob, MediaError,
    OutboundMedia, OutputClock, PlaybackScheduler, SegmentId,
};

pub use realtime::{
    BaseRealtime, BoxedRealtime, ConnectionState, FunctionCall, FunctionDeclaration,
    FunctionResponse, GeminiLive, LiveEvent, RealtimeConfig, RealtimeError, RealtimeProvider,
    RealtimeResult, create_realtime_provider, create_realtime_provider_from_enum,
    get_supported_realtime_providers,
};

pub use tools::{Tool, ToolError, ToolOutcome, ToolRegistry, ToolRelay};

pub use turn::{Turn, TurnError, TurnEvent, TurnOutput, TurnPhase, TurnStateMachine};
