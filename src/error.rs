use crate::{
    id::Table,
    league::{
        ScoringFormat,
        rules,
    },
    prelude::*,
    repo,
};

/// Stable machine-readable error codes, so callers can render specific guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Sequence)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    InsufficientPlayers,
    TeamsNotConfigured,
    ScheduleAlreadyExists,
    Unauthorized,
    InvalidTransition,
    ValidationError,
    NotFound,
    Storage,
}

serde_plain::derive_display_from_serialize!(ErrorKind);

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] Rules(#[from] rules::Error),
    #[error(transparent)] Storage(#[from] repo::Error),
    #[error("need at least {required} members for {format}, found {found}")]
    InsufficientPlayers {
        format: ScoringFormat,
        required: usize,
        found: usize,
    },
    #[error("assigned doubles teams are not fully configured: {0}")]
    TeamsNotConfigured(Cow<'static, str>),
    #[error("a schedule has already been generated for this league")]
    ScheduleAlreadyExists,
    #[error("not allowed: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("invalid transition: {0}")]
    InvalidTransition(Cow<'static, str>),
    #[error("invalid input: {0}")]
    Validation(Cow<'static, str>),
    #[error("no {kind} with ID {id}")]
    NotFound {
        kind: &'static str,
        id: u64,
    },
}

impl Error {
    pub(crate) fn not_found<T: Table>(id: Id<T>) -> Self {
        Self::NotFound { kind: T::KIND, id: id.get() }
    }

    pub(crate) fn kind(&self) -> ErrorKind {
        match self {
            Self::Rules(_) => ErrorKind::ValidationError,
            Self::Storage(_) => ErrorKind::Storage,
            Self::InsufficientPlayers { .. } => ErrorKind::InsufficientPlayers,
            Self::TeamsNotConfigured(_) => ErrorKind::TeamsNotConfigured,
            Self::ScheduleAlreadyExists => ErrorKind::ScheduleAlreadyExists,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        enum_iterator::all,
        super::*,
    };

    #[test]
    fn kinds_have_distinct_codes() {
        let codes = all::<ErrorKind>().map(|kind| kind.to_string()).collect::<HashSet<_>>();
        assert_eq!(codes.len(), all::<ErrorKind>().count());
        assert!(codes.contains("insufficient_players"));
        assert!(codes.contains("validation_error"));
    }

    #[test]
    fn insufficient_players_message_names_the_format() {
        let error = Error::InsufficientPlayers { format: ScoringFormat::Doubles, required: 4, found: 3 };
        assert_eq!(error.to_string(), "need at least 4 members for doubles, found 3");
        assert_eq!(error.kind(), ErrorKind::InsufficientPlayers);
    }
}
