mod caller;
mod shape;

pub use caller::{
    CallContext,
    CallOutcome,
    Caller,
    PendingCall,
    RpcCall,
    RpcResult,
    StreamingCall,
};
pub use shape::{
    CallDescriptor,
    CallSignature,
    DispatchKind,
    ParameterShape,
    ReturnShape,
    SignatureShapeError,
    ValueType,
};
