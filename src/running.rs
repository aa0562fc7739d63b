//! Time trial sessions for running leagues.

use crate::{
    fixture::workflow::Applied,
    league::{
        Actor,
        League,
        ScoringFormat,
        rules::ComparisonMode,
    },
    prelude::*,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
pub(crate) enum SessionStatus {
    Scheduled,
    Open,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "run_status", rename_all = "snake_case")]
pub(crate) enum RunStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Sequence, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RunDecision {
    Approve,
    Reject,
}

serde_plain::derive_display_from_serialize!(SessionStatus);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Run {
    pub(crate) id: Id<Runs>,
    pub(crate) user: Id<Users>,
    pub(crate) elapsed_seconds: u32,
    pub(crate) distance_meters: u32,
    pub(crate) status: RunStatus,
    pub(crate) reviewer_note: Option<String>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) reviewed_by: Option<Id<Users>>,
    pub(crate) reviewed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub(crate) fn new(user: Id<Users>, elapsed_seconds: u32, distance_meters: u32, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            status: RunStatus::Pending,
            reviewer_note: None,
            reviewed_by: None,
            reviewed_at: None,
            user, elapsed_seconds, distance_meters, submitted_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunningSession {
    pub(crate) id: Id<RunningSessions>,
    pub(crate) league: Id<Leagues>,
    pub(crate) week: u8,
    pub(crate) distance_meters: u32,
    pub(crate) starts_at: Option<DateTime<Utc>>,
    pub(crate) deadline: Option<DateTime<Utc>>,
    pub(crate) mode: ComparisonMode,
    pub(crate) status: SessionStatus,
    pub(crate) runs: Vec<Run>,
    pub(crate) finalized_at: Option<DateTime<Utc>>,
    pub(crate) version: u32,
}

/// The result of finalizing a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Finalized {
    pub(crate) session: RunningSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) warning: Option<String>,
}

impl RunningSession {
    pub(crate) fn new(league: Id<Leagues>, week: u8, distance_meters: u32, starts_at: Option<DateTime<Utc>>, deadline: Option<DateTime<Utc>>, mode: ComparisonMode, now: DateTime<Utc>) -> Self {
        Self {
            id: Id::new(),
            status: if starts_at.is_none_or(|starts_at| starts_at <= now) { SessionStatus::Open } else { SessionStatus::Scheduled },
            runs: Vec::default(),
            finalized_at: None,
            version: 0,
            league, week, distance_meters, starts_at, deadline, mode,
        }
    }

    /// Validates and builds a session scheduled by a league organizer.
    pub(crate) fn create(league: &League, actor: &Actor, member_count: usize, week: u8, distance_meters: u32, starts_at: Option<DateTime<Utc>>, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<Self, Error> {
        actor.require_manager("schedule running sessions")?;
        if league.format != ScoringFormat::IndividualTime {
            return Err(Error::Validation(Cow::Owned(format!("running sessions need a time trial league, this one is {}", league.format))))
        }
        if member_count < ScoringFormat::IndividualTime.min_players() {
            return Err(Error::InsufficientPlayers { format: ScoringFormat::IndividualTime, required: ScoringFormat::IndividualTime.min_players(), found: member_count })
        }
        if week == 0 {
            return Err(Error::Validation(Cow::Borrowed("weeks are numbered from 1")))
        }
        if distance_meters == 0 {
            return Err(Error::Validation(Cow::Borrowed("distance must be positive")))
        }
        if let (Some(starts_at), Some(deadline)) = (starts_at, deadline) {
            if deadline <= starts_at {
                return Err(Error::Validation(Cow::Borrowed("deadline must be after the start")))
            }
        }
        Ok(Self::new(league.id, week, distance_meters, starts_at, deadline, league.rules.running_mode, now))
    }

    /// The status, counting a scheduled session whose start has passed as open.
    pub(crate) fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Scheduled if self.starts_at.is_none_or(|starts_at| starts_at <= now) => SessionStatus::Open,
            status => status,
        }
    }

    pub(crate) fn run(&self, id: Id<Runs>) -> Option<&Run> {
        self.runs.iter().find(|run| run.id == id)
    }

    pub(crate) fn open(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<Applied, Error> {
        actor.require_manager("open running sessions")?;
        match self.effective_status(now) {
            SessionStatus::Scheduled => {
                self.status = SessionStatus::Open;
                Ok(Applied::Changed)
            }
            SessionStatus::Open => Ok(Applied::Replayed),
            SessionStatus::Finalized => Err(Error::InvalidTransition(Cow::Borrowed("a finalized session cannot be reopened"))),
        }
    }

    pub(crate) fn submit_run(&mut self, actor: &Actor, elapsed_seconds: u32, distance_meters: u32, now: DateTime<Utc>) -> Result<Id<Runs>, Error> {
        if elapsed_seconds == 0 {
            return Err(Error::Validation(Cow::Borrowed("elapsed time must be positive")))
        }
        if distance_meters == 0 {
            return Err(Error::Validation(Cow::Borrowed("distance must be positive")))
        }
        if self.mode == ComparisonMode::AbsolutePerformance && distance_meters < self.distance_meters {
            return Err(Error::Validation(Cow::Owned(format!("runs must cover the session distance of {} m", self.distance_meters))))
        }
        if !actor.is_member() {
            return Err(Error::Unauthorized(Cow::Borrowed("only league members can submit runs")))
        }
        match self.effective_status(now) {
            SessionStatus::Open => {}
            status => return Err(Error::InvalidTransition(Cow::Owned(format!("runs cannot be submitted to a {status} session")))),
        }
        if self.deadline.is_some_and(|deadline| now > deadline) {
            return Err(Error::InvalidTransition(Cow::Borrowed("the submission deadline has passed")))
        }
        self.status = SessionStatus::Open;
        if let Some(run) = self.runs.iter_mut().find(|run| run.user == actor.user) {
            if run.status == RunStatus::Approved {
                return Err(Error::InvalidTransition(Cow::Borrowed("an approved run cannot be replaced")))
            }
            run.elapsed_seconds = elapsed_seconds;
            run.distance_meters = distance_meters;
            run.status = RunStatus::Pending;
            run.reviewer_note = None;
            run.reviewed_by = None;
            run.reviewed_at = None;
            run.submitted_at = now;
            return Ok(run.id)
        }
        let run = Run::new(actor.user, elapsed_seconds, distance_meters, now);
        let id = run.id;
        self.runs.push(run);
        Ok(id)
    }

    pub(crate) fn review_run(&mut self, actor: &Actor, run_id: Id<Runs>, decision: RunDecision, note: Option<String>, now: DateTime<Utc>) -> Result<Applied, Error> {
        actor.require_manager("review runs")?;
        if self.status == SessionStatus::Finalized {
            return Err(Error::InvalidTransition(Cow::Borrowed("runs of a finalized session cannot be reviewed")))
        }
        let run = self.runs.iter_mut().find(|run| run.id == run_id).ok_or_else(|| Error::not_found(run_id))?;
        let status = match decision {
            RunDecision::Approve => RunStatus::Approved,
            RunDecision::Reject => RunStatus::Rejected,
        };
        if run.status == status {
            return Ok(Applied::Replayed)
        }
        run.status = status;
        run.reviewer_note = note;
        run.reviewed_by = Some(actor.user);
        run.reviewed_at = Some(now);
        Ok(Applied::Changed)
    }

    /// Freezes the run set. Returns a warning if no run was approved.
    pub(crate) fn finalize(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(Applied, Option<String>), Error> {
        actor.require_manager("finalize running sessions")?;
        if self.status == SessionStatus::Finalized {
            return Ok((Applied::Replayed, None))
        }
        self.status = SessionStatus::Finalized;
        self.finalized_at = Some(now);
        let warning = (!self.runs.iter().any(|run| run.status == RunStatus::Approved))
            .then(|| format!("session {} was finalized without approved runs and does not count towards standings", self.id));
        Ok((Applied::Changed, warning))
    }
}

#[cfg(test)]
mod tests {
    use {
        chrono::TimeDelta,
        crate::league::{
            MemberRole,
            Sport,
            rules::Rules,
        },
        super::*,
    };

    fn league() -> League {
        League {
            id: Id::from(1),
            name: format!("Parkrun"),
            sport: Sport::Running,
            format: ScoringFormat::IndividualTime,
            rotation: None,
            season_weeks: 4,
            start_date: None,
            rules: Rules::default(),
            created_at: Utc::now(),
        }
    }

    fn owner() -> Actor {
        Actor { user: Id::from(1), role: Some(MemberRole::Owner) }
    }

    fn runner(user: u64) -> Actor {
        Actor { user: Id::from(user), role: Some(MemberRole::Member) }
    }

    #[test]
    fn future_start_is_scheduled() {
        let now = Utc::now();
        let session = RunningSession::create(&league(), &owner(), 2, 1, 5000, Some(now + TimeDelta::hours(2)), None, now).unwrap();
        assert_eq!(session.status, SessionStatus::Scheduled);
        assert_eq!(session.effective_status(now + TimeDelta::hours(3)), SessionStatus::Open);
        let open = RunningSession::create(&league(), &owner(), 2, 1, 5000, None, None, now).unwrap();
        assert_eq!(open.status, SessionStatus::Open);
    }

    #[test]
    fn creation_is_validated() {
        let now = Utc::now();
        assert!(matches!(RunningSession::create(&league(), &runner(2), 2, 1, 5000, None, None, now), Err(Error::Unauthorized(_))));
        assert!(matches!(RunningSession::create(&league(), &owner(), 0, 1, 5000, None, None, now), Err(Error::InsufficientPlayers { .. })));
        assert!(matches!(RunningSession::create(&league(), &owner(), 2, 0, 5000, None, None, now), Err(Error::Validation(_))));
        assert!(matches!(RunningSession::create(&league(), &owner(), 2, 1, 5000, Some(now), Some(now), now), Err(Error::Validation(_))));
    }

    #[test]
    fn rejected_run_can_be_resubmitted() {
        let now = Utc::now();
        let mut session = RunningSession::create(&league(), &owner(), 2, 1, 5000, None, None, now).unwrap();
        let run = session.submit_run(&runner(2), 1500, 5000, now).unwrap();
        assert_eq!(session.review_run(&owner(), run, RunDecision::Reject, Some(format!("no GPS trace")), now).unwrap(), Applied::Changed);
        assert_eq!(session.submit_run(&runner(2), 1490, 5000, now).unwrap(), run);
        assert_eq!(session.run(run).unwrap().status, RunStatus::Pending);
        assert_eq!(session.run(run).unwrap().reviewer_note, None);
        assert_eq!(session.review_run(&owner(), run, RunDecision::Approve, None, now).unwrap(), Applied::Changed);
        assert!(matches!(session.submit_run(&runner(2), 1400, 5000, now), Err(Error::InvalidTransition(_))));
        assert_eq!(session.runs.len(), 1);
    }

    #[test]
    fn late_and_invalid_runs_are_refused() {
        let now = Utc::now();
        let mut session = RunningSession::create(&league(), &owner(), 2, 1, 5000, None, Some(now + TimeDelta::hours(1)), now).unwrap();
        assert!(matches!(session.submit_run(&runner(2), 0, 5000, now), Err(Error::Validation(_))));
        assert!(matches!(session.submit_run(&Actor { user: Id::from(9), role: None }, 1500, 5000, now), Err(Error::Unauthorized(_))));
        assert!(matches!(session.submit_run(&runner(2), 1500, 5000, now + TimeDelta::hours(2)), Err(Error::InvalidTransition(_))));
    }

    #[test]
    fn short_runs_only_count_for_progress() {
        let now = Utc::now();
        let mut absolute = RunningSession::create(&league(), &owner(), 2, 1, 5000, None, None, now).unwrap();
        assert_eq!(absolute.mode, ComparisonMode::AbsolutePerformance);
        assert!(matches!(absolute.submit_run(&runner(2), 300, 1000, now), Err(Error::Validation(_))));
        assert!(absolute.runs.is_empty());
        absolute.submit_run(&runner(2), 1900, 5200, now).unwrap();
        let mut progress = RunningSession { mode: ComparisonMode::PersonalProgress, ..absolute.clone() };
        progress.runs.clear();
        progress.submit_run(&runner(2), 300, 1000, now).unwrap();
        assert_eq!(progress.runs.len(), 1);
    }

    #[test]
    fn finalize_is_idempotent_and_warns() {
        let now = Utc::now();
        let mut session = RunningSession::create(&league(), &owner(), 2, 1, 5000, None, None, now).unwrap();
        session.submit_run(&runner(2), 1500, 5000, now).unwrap();
        let (applied, warning) = session.finalize(&owner(), now).unwrap();
        assert_eq!(applied, Applied::Changed);
        assert!(warning.is_some());
        assert_eq!(session.finalize(&owner(), now).unwrap(), (Applied::Replayed, None));
        assert!(matches!(session.submit_run(&runner(3), 1500, 5000, now), Err(Error::InvalidTransition(_))));
        assert!(matches!(session.review_run(&owner(), session.runs[0].id, RunDecision::Approve, None, now), Err(Error::InvalidTransition(_))));
    }
}
