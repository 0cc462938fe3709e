use std::fmt::Display;

use thiserror::Error;

use crate::core::uri::Uri;

/// An opaque, named type token carried through classification.
///
/// The classifier decides how a call is dispatched; interpreting the types themselves belongs to
/// whatever layer serializes arguments and results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueType(String);

impl ValueType {
    pub fn new<S>(name: S) -> Self
    where
        S: Into<String>,
    {
        Self(name.into())
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ValueType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The declared return shape of a remote-callable signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnShape {
    /// The call returns nothing.
    Unit,
    /// The call returns a single value directly.
    Value(ValueType),
    /// The call returns a handle that resolves to a single value (or nothing) later.
    Deferred(Option<ValueType>),
    /// The call returns a push-based sequence of values.
    Stream(ValueType),
}

/// The declared shape of one parameter of a remote-callable signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterShape {
    /// An ordinary value parameter, serialized into the call.
    Value { name: String, value_type: ValueType },
    /// A sink through which progressive results are delivered to the caller.
    ProgressSink { name: String, item: ValueType },
    /// A cooperative cancellation token.
    CancellationToken,
}

/// A declared remote-call signature, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSignature {
    /// The procedure the signature is bound to.
    pub procedure: Uri,
    /// The declared return shape.
    pub returns: ReturnShape,
    /// The declared parameters, in order.
    pub parameters: Vec<ParameterShape>,
    /// Whether the call declares intent to receive progressive results through a sink.
    pub progressive: bool,
}

/// How an invocation of a classified call is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// The invocation blocks until the single result arrives.
    Sync,
    /// The invocation returns a pending handle that resolves to the single result.
    Deferred,
    /// As [`Self::Deferred`], with intermediate results delivered to a progress sink.
    Progressive,
    /// The invocation returns a sequence that yields each result as it arrives.
    Streaming,
}

/// Error for a remote-call signature whose shape does not classify.
///
/// Shape errors are raised at classification time, before any call is issued, so misdeclared
/// signatures never produce network traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureShapeError {
    /// The signature is marked progressive but also declares a streaming return.
    #[error("a progressive call cannot return a stream")]
    ProgressiveStreamExclusive,
    /// The signature is marked progressive but does not declare a deferred return.
    #[error("a progressive call must return a deferred result")]
    ProgressiveRequiresDeferred,
    /// The signature is marked progressive but declares no trailing progress sink.
    #[error("a progressive call must declare a trailing progress sink parameter")]
    MissingProgressSink,
    /// The signature declares more than one progress sink.
    #[error("a progressive call must declare exactly one progress sink parameter")]
    AmbiguousProgressSink,
    /// The signature declares a progress sink without being marked progressive.
    #[error("a progress sink parameter requires the progressive marker")]
    ProgressSinkRequiresProgressive,
    /// A synchronous signature declares a cancellation token.
    #[error("cancellation requires a deferred or streaming return")]
    CancellationRequiresDeferred,
    /// A cancellation token is declared somewhere other than the final parameter.
    #[error("a cancellation token must be the final parameter")]
    CancellationTokenNotLast,
}

/// The classified shape of one remote-callable signature.
///
/// Descriptors are immutable. They are produced once, by [`CallDescriptor::classify`] or one of
/// the per-kind constructors, and consulted on every invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    /// The procedure the descriptor is bound to.
    pub procedure: Uri,
    /// How invocations are dispatched.
    pub kind: DispatchKind,
    /// The declared result type, if the signature names one.
    pub result_type: Option<ValueType>,
    /// The declared progress item type, for progressive dispatch only.
    pub progress_type: Option<ValueType>,
    /// Whether invocations may carry a cooperative cancellation token.
    pub accepts_cancellation: bool,
}

impl CallDescriptor {
    /// Classifies a declared signature into exactly one dispatch kind.
    pub fn classify(signature: &CallSignature) -> Result<Self, SignatureShapeError> {
        let accepts_cancellation = Self::validate_cancellation_token(signature)?;
        let sinks = signature
            .parameters
            .iter()
            .enumerate()
            .filter_map(|(i, parameter)| match parameter {
                ParameterShape::ProgressSink { item, .. } => Some((i, item.clone())),
                _ => None,
            })
            .collect::<Vec<_>>();

        if let ReturnShape::Stream(item) = &signature.returns {
            if signature.progressive {
                return Err(SignatureShapeError::ProgressiveStreamExclusive);
            }
            if !sinks.is_empty() {
                return Err(SignatureShapeError::ProgressSinkRequiresProgressive);
            }
            return Ok(Self {
                procedure: signature.procedure.clone(),
                kind: DispatchKind::Streaming,
                result_type: Some(item.clone()),
                progress_type: None,
                accepts_cancellation,
            });
        }

        if signature.progressive {
            let result_type = match &signature.returns {
                ReturnShape::Deferred(result_type) => result_type.clone(),
                _ => return Err(SignatureShapeError::ProgressiveRequiresDeferred),
            };
            if sinks.len() > 1 {
                return Err(SignatureShapeError::AmbiguousProgressSink);
            }
            let (position, item) = match sinks.into_iter().next() {
                Some(sink) => sink,
                None => return Err(SignatureShapeError::MissingProgressSink),
            };
            // The sink must be the last parameter, ignoring a trailing cancellation token.
            let expected_position =
                signature.parameters.len() - 1 - usize::from(accepts_cancellation);
            if position != expected_position {
                return Err(SignatureShapeError::MissingProgressSink);
            }
            return Ok(Self {
                procedure: signature.procedure.clone(),
                kind: DispatchKind::Progressive,
                result_type,
                progress_type: Some(item),
                accepts_cancellation,
            });
        }

        if !sinks.is_empty() {
            return Err(SignatureShapeError::ProgressSinkRequiresProgressive);
        }

        match &signature.returns {
            ReturnShape::Deferred(result_type) => Ok(Self {
                procedure: signature.procedure.clone(),
                kind: DispatchKind::Deferred,
                result_type: result_type.clone(),
                progress_type: None,
                accepts_cancellation,
            }),
            returns => {
                if accepts_cancellation {
                    return Err(SignatureShapeError::CancellationRequiresDeferred);
                }
                let result_type = match returns {
                    ReturnShape::Value(result_type) => Some(result_type.clone()),
                    _ => None,
                };
                Ok(Self {
                    procedure: signature.procedure.clone(),
                    kind: DispatchKind::Sync,
                    result_type,
                    progress_type: None,
                    accepts_cancellation: false,
                })
            }
        }
    }

    fn validate_cancellation_token(
        signature: &CallSignature,
    ) -> Result<bool, SignatureShapeError> {
        let last = signature.parameters.len().wrapping_sub(1);
        for (i, parameter) in signature.parameters.iter().enumerate() {
            if matches!(parameter, ParameterShape::CancellationToken) && i != last {
                return Err(SignatureShapeError::CancellationTokenNotLast);
            }
        }
        Ok(matches!(
            signature.parameters.last(),
            Some(ParameterShape::CancellationToken)
        ))
    }

    /// A descriptor for a call that blocks for its single result.
    pub fn synchronous(procedure: Uri) -> Self {
        Self {
            procedure,
            kind: DispatchKind::Sync,
            result_type: None,
            progress_type: None,
            accepts_cancellation: false,
        }
    }

    /// A descriptor for a call that resolves to its single result later.
    pub fn deferred(procedure: Uri) -> Self {
        Self {
            procedure,
            kind: DispatchKind::Deferred,
            result_type: None,
            progress_type: None,
            accepts_cancellation: true,
        }
    }

    /// A descriptor for a call that delivers intermediate results to a progress sink.
    pub fn progressive(procedure: Uri) -> Self {
        Self {
            procedure,
            kind: DispatchKind::Progressive,
            result_type: None,
            progress_type: None,
            accepts_cancellation: true,
        }
    }

    /// A descriptor for a call whose results arrive as a push-based sequence.
    pub fn streaming(procedure: Uri) -> Self {
        Self {
            procedure,
            kind: DispatchKind::Streaming,
            result_type: None,
            progress_type: None,
            accepts_cancellation: true,
        }
    }
}

#[cfg(test)]
mod shape_test {
    use crate::{
        core::uri::Uri,
        rpc::shape::{
            CallDescriptor,
            CallSignature,
            DispatchKind,
            ParameterShape,
            ReturnShape,
            SignatureShapeError,
            ValueType,
        },
    };

    fn signature(
        returns: ReturnShape,
        parameters: Vec<ParameterShape>,
        progressive: bool,
    ) -> CallSignature {
        CallSignature {
            procedure: Uri::try_from("com.example.procedure").unwrap(),
            returns,
            parameters,
            progressive,
        }
    }

    fn value_parameter(name: &str, value_type: &str) -> ParameterShape {
        ParameterShape::Value {
            name: name.to_owned(),
            value_type: ValueType::from(value_type),
        }
    }

    fn sink_parameter(name: &str, item: &str) -> ParameterShape {
        ParameterShape::ProgressSink {
            name: name.to_owned(),
            item: ValueType::from(item),
        }
    }

    #[test]
    fn classifies_direct_returns_as_sync() {
        let descriptor = CallDescriptor::classify(&signature(
            ReturnShape::Value(ValueType::from("u64")),
            Vec::from_iter([value_parameter("a", "u64"), value_parameter("b", "u64")]),
            false,
        ))
        .unwrap();
        assert_eq!(descriptor.kind, DispatchKind::Sync);
        assert_eq!(descriptor.result_type, Some(ValueType::from("u64")));
        assert!(!descriptor.accepts_cancellation);

        let descriptor =
            CallDescriptor::classify(&signature(ReturnShape::Unit, Vec::new(), false)).unwrap();
        assert_eq!(descriptor.kind, DispatchKind::Sync);
        assert_eq!(descriptor.result_type, None);
    }

    #[test]
    fn rejects_cancellation_on_sync_signature() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Value(ValueType::from("u64")),
                Vec::from_iter([value_parameter("a", "u64"), ParameterShape::CancellationToken]),
                false,
            )),
            Err(SignatureShapeError::CancellationRequiresDeferred),
        );
    }

    #[test]
    fn classifies_deferred_returns_with_trailing_token() {
        let descriptor = CallDescriptor::classify(&signature(
            ReturnShape::Deferred(Some(ValueType::from("String"))),
            Vec::from_iter([value_parameter("name", "String"), ParameterShape::CancellationToken]),
            false,
        ))
        .unwrap();
        assert_eq!(descriptor.kind, DispatchKind::Deferred);
        assert_eq!(descriptor.result_type, Some(ValueType::from("String")));
        assert!(descriptor.accepts_cancellation);
    }

    #[test]
    fn rejects_cancellation_token_before_other_parameters() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Deferred(None),
                Vec::from_iter([ParameterShape::CancellationToken, value_parameter("a", "u64")]),
                false,
            )),
            Err(SignatureShapeError::CancellationTokenNotLast),
        );
    }

    #[test]
    fn progressive_marker_selects_progressive_over_deferred() {
        let parameters = Vec::from_iter([
            value_parameter("query", "String"),
            sink_parameter("progress", "SearchHit"),
            ParameterShape::CancellationToken,
        ]);

        let descriptor = CallDescriptor::classify(&signature(
            ReturnShape::Deferred(Some(ValueType::from("SearchSummary"))),
            parameters.clone(),
            true,
        ))
        .unwrap();
        assert_eq!(descriptor.kind, DispatchKind::Progressive);
        assert_eq!(descriptor.result_type, Some(ValueType::from("SearchSummary")));
        assert_eq!(descriptor.progress_type, Some(ValueType::from("SearchHit")));
        assert!(descriptor.accepts_cancellation);

        // The same parameters without the marker never feed the sink, so the shape is invalid
        // rather than silently deferred.
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Deferred(Some(ValueType::from("SearchSummary"))),
                parameters,
                false,
            )),
            Err(SignatureShapeError::ProgressSinkRequiresProgressive),
        );
    }

    #[test]
    fn rejects_progressive_without_sink() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Deferred(None),
                Vec::from_iter([value_parameter("a", "u64")]),
                true,
            )),
            Err(SignatureShapeError::MissingProgressSink),
        );
    }

    #[test]
    fn rejects_progressive_sink_in_non_trailing_position() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Deferred(None),
                Vec::from_iter([sink_parameter("progress", "u64"), value_parameter("a", "u64")]),
                true,
            )),
            Err(SignatureShapeError::MissingProgressSink),
        );
    }

    #[test]
    fn rejects_ambiguous_progressive_sinks() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Deferred(None),
                Vec::from_iter([sink_parameter("first", "u64"), sink_parameter("second", "u64")]),
                true,
            )),
            Err(SignatureShapeError::AmbiguousProgressSink),
        );
    }

    #[test]
    fn rejects_progressive_without_deferred_return() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Value(ValueType::from("u64")),
                Vec::from_iter([sink_parameter("progress", "u64")]),
                true,
            )),
            Err(SignatureShapeError::ProgressiveRequiresDeferred),
        );
    }

    #[test]
    fn classifies_stream_returns_as_streaming() {
        let descriptor = CallDescriptor::classify(&signature(
            ReturnShape::Stream(ValueType::from("LogLine")),
            Vec::from_iter([value_parameter("filter", "String"), ParameterShape::CancellationToken]),
            false,
        ))
        .unwrap();
        assert_eq!(descriptor.kind, DispatchKind::Streaming);
        assert_eq!(descriptor.result_type, Some(ValueType::from("LogLine")));
        assert_eq!(descriptor.progress_type, None);
        assert!(descriptor.accepts_cancellation);
    }

    #[test]
    fn rejects_progressive_stream() {
        assert_eq!(
            CallDescriptor::classify(&signature(
                ReturnShape::Stream(ValueType::from("LogLine")),
                Vec::from_iter([sink_parameter("progress", "LogLine")]),
                true,
            )),
            Err(SignatureShapeError::ProgressiveStreamExclusive),
        );
    }
}
