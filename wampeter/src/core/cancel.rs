/// How an in-flight procedure call is canceled, transmitted in CANCEL `options.mode`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CallCancelMode {
    /// The router answers with an ERROR immediately and lets the remote procedure run out on
    /// its own.
    #[default]
    Skip,
    /// The remote procedure is told to stop, and the router's terminal answer (ERROR or RESULT)
    /// arrives only once it has. The call stays registered until then.
    Kill,
    /// The remote procedure is told to stop, but the router answers immediately. The caller can
    /// complete the call locally without waiting for anything further.
    KillNoWait,
}

impl TryFrom<&str> for CallCancelMode {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "skip" => Ok(Self::Skip),
            "kill" => Ok(Self::Kill),
            "killnowait" => Ok(Self::KillNoWait),
            _ => Err(Self::Error::msg(format!(
                "invalid call cancel mode: {value}"
            ))),
        }
    }
}

impl Into<&'static str> for CallCancelMode {
    fn into(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Kill => "kill",
            Self::KillNoWait => "killnowait",
        }
    }
}

impl Into<String> for CallCancelMode {
    fn into(self) -> String {
        Into::<&'static str>::into(self).to_owned()
    }
}

impl ToString for CallCancelMode {
    fn to_string(&self) -> String {
        (*self).into()
    }
}

#[cfg(test)]
mod cancel_test {
    use crate::core::cancel::CallCancelMode;

    #[test]
    fn converts_modes_to_and_from_strings() {
        assert_eq!(CallCancelMode::Skip.to_string(), "skip");
        assert_eq!(CallCancelMode::Kill.to_string(), "kill");
        assert_eq!(CallCancelMode::KillNoWait.to_string(), "killnowait");

        assert_matches::assert_matches!(
            CallCancelMode::try_from("killnowait"),
            Ok(CallCancelMode::KillNoWait)
        );
        assert_matches::assert_matches!(CallCancelMode::try_from("abort"), Err(err) => {
            assert_eq!(err.to_string(), "invalid call cancel mode: abort");
        });
    }

    #[test]
    fn defaults_to_skip() {
        assert_eq!(CallCancelMode::default(), CallCancelMode::Skip);
    }
}
