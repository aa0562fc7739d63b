//! The result submission state machine of a single fixture.

use crate::{
    fixture::{
        Fixture,
        FixtureStatus,
        Score,
        Side,
    },
    league::{
        Actor,
        ScoringFormat,
        rules::Rules,
    },
    prelude::*,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "outcome_type", rename_all = "snake_case")]
pub(crate) enum Outcome {
    Played,
    Forfeit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submission_status", rename_all = "snake_case")]
pub(crate) enum SubmissionStatus {
    Pending,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Sequence, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Decision {
    Confirm,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Submission {
    pub(crate) id: Id<Submissions>,
    pub(crate) fixture: Id<Fixtures>,
    pub(crate) submitted_by: Id<Users>,
    pub(crate) outcome: Outcome,
    pub(crate) winner: Option<Side>,
    pub(crate) score: Option<Score>,
    pub(crate) forfeit_reason: Option<String>,
    pub(crate) notes: Option<String>,
    pub(crate) status: SubmissionStatus,
    pub(crate) review_reason: Option<String>,
    pub(crate) reviewed_by: Option<Id<Users>>,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) reviewed_at: Option<DateTime<Utc>>,
}

impl Submission {
    fn close(&mut self, status: SubmissionStatus, reviewer: Option<Id<Users>>, reason: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.reviewed_by = reviewer;
        self.review_reason = reason;
        self.reviewed_at = Some(now);
    }

    /// Whether two claims describe the same result.
    fn agrees_with(&self, other: &Self, format: ScoringFormat) -> bool {
        if format.is_two_sided() {
            self.winner == other.winner
        } else {
            self.score == other.score
        }
    }
}

/// A proposed result as sent by a participant.
#[derive(Debug, Clone)]
pub(crate) struct ResultPayload {
    /// Client-chosen ID, making resubmission of the same claim idempotent.
    pub(crate) submission_id: Option<Id<Submissions>>,
    pub(crate) outcome: Outcome,
    pub(crate) winner: Option<Side>,
    pub(crate) score: Option<Score>,
    pub(crate) forfeit_reason: Option<String>,
    pub(crate) notes: Option<String>,
}

impl ResultPayload {
    /// Checks the payload against the fixture, dropping fields that do not apply to its outcome.
    fn validate(self, format: ScoringFormat, fixture: &Fixture) -> Result<Self, Error> {
        match self.outcome {
            Outcome::Forfeit => {
                if !format.is_two_sided() {
                    return Err(Error::Validation(Cow::Owned(format!("forfeits are not recorded in {format} fixtures"))))
                }
                if self.winner.is_none() {
                    return Err(Error::Validation(Cow::Borrowed("a forfeit needs a winning side")))
                }
                Ok(Self { score: None, ..self })
            }
            Outcome::Played => {
                match (format, &self.score) {
                    (ScoringFormat::IndividualTime, _) => return Err(Error::Validation(Cow::Borrowed("time trial results are recorded through running sessions"))),
                    (ScoringFormat::IndividualPoints, None) => return Err(Error::Validation(Cow::Borrowed("points entries are required"))),
                    (ScoringFormat::IndividualPoints, Some(Score::Entries(entries))) => {
                        if self.winner.is_some() {
                            return Err(Error::Validation(Cow::Borrowed("individual fixtures have no winning side")))
                        }
                        let mut seen = HashSet::new();
                        for entry in entries {
                            if !fixture.is_participant(entry.user) {
                                return Err(Error::Validation(Cow::Owned(format!("user {} is not part of this fixture", entry.user))))
                            }
                            if !seen.insert(entry.user) {
                                return Err(Error::Validation(Cow::Owned(format!("user {} has more than one entry", entry.user))))
                            }
                        }
                    }
                    (ScoringFormat::Singles | ScoringFormat::Doubles, Some(Score::Sets(sets))) => {
                        if sets.is_empty() {
                            return Err(Error::Validation(Cow::Borrowed("at least one set is required")))
                        }
                        if sets.iter().any(|set| set.a == set.b) {
                            return Err(Error::Validation(Cow::Borrowed("a set cannot be tied")))
                        }
                        if self.score.as_ref().and_then(Score::implied_winner) != Some(self.winner) || self.winner.is_none() {
                            return Err(Error::Validation(Cow::Borrowed("the winner must have won more sets")))
                        }
                    }
                    (ScoringFormat::Singles | ScoringFormat::Doubles, None) => if self.winner.is_none() {
                        return Err(Error::Validation(Cow::Owned(format!("{format} fixtures cannot be drawn"))))
                    },
                    (ScoringFormat::TeamVsTeam, Some(score @ Score::Goals { .. })) => if score.implied_winner() != Some(self.winner) {
                        return Err(Error::Validation(Cow::Borrowed("the winner does not match the goals")))
                    },
                    (ScoringFormat::TeamVsTeam, None) => {}
                    (_, Some(_)) => return Err(Error::Validation(Cow::Owned(format!("wrong kind of score for {format}")))),
                }
                Ok(Self { forfeit_reason: None, ..self })
            }
        }
    }
}

/// Whether an operation changed the record or matched a request that was already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub(crate) enum Applied {
    Changed,
    Replayed,
}

/// A fixture together with every result claim made about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixtureRecord {
    #[serde(flatten)]
    pub(crate) fixture: Fixture,
    pub(crate) submissions: Vec<Submission>,
}

impl FixtureRecord {
    pub(crate) fn submission(&self, id: Id<Submissions>) -> Option<&Submission> {
        self.submissions.iter().find(|submission| submission.id == id)
    }

    fn pending(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.iter().filter(|submission| submission.status == SubmissionStatus::Pending)
    }

    fn ensure_completable(&self, format: ScoringFormat) -> Result<(), Error> {
        if format.is_two_sided() && !self.fixture.has_two_sides() {
            return Err(Error::InvalidTransition(Cow::Borrowed("a fixture needs players on both sides before it can be completed")))
        }
        Ok(())
    }

    fn complete(&mut self, winner: Option<Side>, score: Option<Score>, forfeit_reason: Option<&str>) {
        self.fixture.status = FixtureStatus::Completed;
        self.fixture.winner = winner;
        self.fixture.score = score;
        if let Some(reason) = forfeit_reason {
            self.fixture.append_note(&format!("forfeit: {reason}"));
        }
    }

    /// Whether `reviewer` is on the other side of the claim made by `submitter`.
    fn opposes(&self, format: ScoringFormat, reviewer: Id<Users>, submitter: Id<Users>) -> bool {
        if format.is_two_sided() {
            match (self.fixture.side_of(reviewer), self.fixture.side_of(submitter)) {
                (Some(reviewer_side), Some(submitter_side)) => reviewer_side == submitter_side.opponent(),
                (_, _) => false,
            }
        } else {
            reviewer != submitter && self.fixture.is_participant(reviewer) && self.fixture.is_participant(submitter)
        }
    }

    pub(crate) fn submit(&mut self, format: ScoringFormat, actor: &Actor, payload: ResultPayload, now: DateTime<Utc>) -> Result<Applied, Error> {
        if let Some(existing) = payload.submission_id.and_then(|id| self.submission(id)) {
            return if existing.submitted_by == actor.user {
                Ok(Applied::Replayed)
            } else {
                Err(Error::Validation(Cow::Owned(format!("submission ID {} is already taken", existing.id))))
            }
        }
        if !self.fixture.is_participant(actor.user) {
            return Err(Error::Unauthorized(Cow::Borrowed("only participants can submit a result")))
        }
        let payload = payload.validate(format, &self.fixture)?;
        let submission = Submission {
            id: payload.submission_id.unwrap_or_else(Id::new),
            fixture: self.fixture.id,
            submitted_by: actor.user,
            outcome: payload.outcome,
            winner: payload.winner,
            score: payload.score,
            forfeit_reason: payload.forfeit_reason,
            notes: payload.notes,
            status: SubmissionStatus::Pending,
            review_reason: None,
            reviewed_by: None,
            submitted_at: now,
            reviewed_at: None,
        };
        match self.fixture.status {
            FixtureStatus::Scheduled => {
                self.fixture.status = FixtureStatus::AwaitingConfirmation;
            }
            FixtureStatus::AwaitingConfirmation => {
                let Some(current) = self.pending().last() else {
                    return Err(Error::InvalidTransition(Cow::Borrowed("fixture is awaiting confirmation without a pending claim")))
                };
                let current_id = current.id;
                if self.opposes(format, actor.user, current.submitted_by) {
                    if current.agrees_with(&submission, format) {
                        self.ensure_completable(format)?;
                        let (winner, score, forfeit_reason) = (current.winner, current.score.clone(), current.forfeit_reason.clone());
                        for pending in self.submissions.iter_mut().filter(|submission| submission.id == current_id) {
                            pending.close(SubmissionStatus::Confirmed, Some(actor.user), Some(format!("matching result submitted")), now);
                        }
                        self.complete(winner, score, forfeit_reason.as_deref());
                        self.fixture.latest_submission = Some(submission.id);
                        self.submissions.push(Submission {
                            status: SubmissionStatus::Confirmed,
                            reviewed_at: Some(now),
                            ..submission
                        });
                        log::info!("fixture {} completed by matching results", self.fixture.id);
                        return Ok(Applied::Changed)
                    }
                    self.fixture.status = FixtureStatus::Disputed;
                    log::info!("fixture {} disputed by conflicting results", self.fixture.id);
                } else {
                    for pending in self.submissions.iter_mut().filter(|submission| submission.id == current_id) {
                        pending.close(SubmissionStatus::Rejected, Some(actor.user), Some(format!("superseded")), now);
                    }
                }
            }
            FixtureStatus::Disputed | FixtureStatus::Completed | FixtureStatus::Cancelled => {
                return Err(Error::InvalidTransition(Cow::Owned(format!("cannot submit a result for a {} fixture", self.fixture.status))))
            }
        }
        self.fixture.latest_submission = Some(submission.id);
        self.submissions.push(submission);
        Ok(Applied::Changed)
    }

    pub(crate) fn confirm(&mut self, format: ScoringFormat, rules: &Rules, actor: &Actor, submission_id: Id<Submissions>, decision: Decision, reason: Option<String>, now: DateTime<Utc>) -> Result<Applied, Error> {
        let submission = self.submission(submission_id).ok_or_else(|| Error::not_found(submission_id))?;
        let peer = rules.peer_confirmation && self.opposes(format, actor.user, submission.submitted_by);
        if !peer && !actor.can_manage() {
            return Err(Error::Unauthorized(Cow::Borrowed("only the opposing side or a league organizer can review this result")))
        }
        match (decision, submission.status) {
            (Decision::Confirm, SubmissionStatus::Confirmed) | (Decision::Reject, SubmissionStatus::Rejected) => return Ok(Applied::Replayed),
            (_, _) => {}
        }
        match self.fixture.status {
            FixtureStatus::AwaitingConfirmation => {}
            FixtureStatus::Disputed if actor.can_manage() => {}
            status => return Err(Error::InvalidTransition(Cow::Owned(format!("cannot review a result of a {status} fixture")))),
        }
        if submission.status != SubmissionStatus::Pending {
            return Err(Error::InvalidTransition(Cow::Owned(format!("submission {submission_id} is no longer pending"))))
        }
        match decision {
            Decision::Confirm => {
                self.ensure_completable(format)?;
                let (winner, score, forfeit_reason) = (submission.winner, submission.score.clone(), submission.forfeit_reason.clone());
                for pending in self.submissions.iter_mut().filter(|submission| submission.status == SubmissionStatus::Pending) {
                    if pending.id == submission_id {
                        pending.close(SubmissionStatus::Confirmed, Some(actor.user), reason.clone(), now);
                    } else {
                        pending.close(SubmissionStatus::Rejected, Some(actor.user), Some(format!("another result was confirmed")), now);
                    }
                }
                self.complete(winner, score, forfeit_reason.as_deref());
                self.fixture.latest_submission = Some(submission_id);
                log::info!("fixture {} completed by confirmation of submission {submission_id}", self.fixture.id);
            }
            Decision::Reject => {
                for pending in self.submissions.iter_mut().filter(|submission| submission.id == submission_id) {
                    pending.close(SubmissionStatus::Rejected, Some(actor.user), reason.clone(), now);
                }
                if let Some(remaining) = self.pending().last().map(|submission| submission.id) {
                    self.fixture.status = FixtureStatus::AwaitingConfirmation;
                    self.fixture.latest_submission = Some(remaining);
                } else {
                    self.fixture.status = FixtureStatus::Scheduled;
                }
                log::info!("submission {submission_id} for fixture {} rejected", self.fixture.id);
            }
        }
        Ok(Applied::Changed)
    }

    /// Settles a disputed fixture by ruling of a league organizer.
    pub(crate) fn resolve(&mut self, format: ScoringFormat, actor: &Actor, winner: Option<Side>, reason: Option<String>, now: DateTime<Utc>) -> Result<Applied, Error> {
        if !actor.can_manage() {
            return Err(Error::Unauthorized(Cow::Borrowed("only league owners and admins can resolve disputes")))
        }
        if self.fixture.status != FixtureStatus::Disputed {
            return Err(Error::InvalidTransition(Cow::Owned(format!("only disputed fixtures can be resolved, this one is {}", self.fixture.status))))
        }
        if !format.is_two_sided() {
            return Err(Error::Validation(Cow::Borrowed("individual disputes are settled by confirming one of the claims")))
        }
        if winner.is_none() && format != ScoringFormat::TeamVsTeam {
            return Err(Error::Validation(Cow::Owned(format!("{format} fixtures cannot be drawn"))))
        }
        self.ensure_completable(format)?;
        let ruling = self.pending().find(|submission| submission.winner == winner).map(|submission| (submission.score.clone(), submission.forfeit_reason.clone()));
        for pending in self.submissions.iter_mut().filter(|submission| submission.status == SubmissionStatus::Pending) {
            if pending.winner == winner {
                pending.close(SubmissionStatus::Confirmed, Some(actor.user), reason.clone(), now);
            } else {
                pending.close(SubmissionStatus::Rejected, Some(actor.user), Some(format!("overruled")), now);
            }
        }
        let (score, forfeit_reason) = ruling.unwrap_or_default();
        self.complete(winner, score, forfeit_reason.as_deref());
        self.fixture.append_note(&match reason {
            Some(reason) => format!("dispute resolved: {reason}"),
            None => format!("dispute resolved"),
        });
        log::info!("dispute on fixture {} resolved by {}", self.fixture.id, actor.user);
        Ok(Applied::Changed)
    }

    pub(crate) fn cancel(&mut self, actor: &Actor, reason: Option<String>, now: DateTime<Utc>) -> Result<Applied, Error> {
        actor.require_manager("cancel fixtures")?;
        match self.fixture.status {
            FixtureStatus::Scheduled | FixtureStatus::AwaitingConfirmation => {}
            status => return Err(Error::InvalidTransition(Cow::Owned(format!("a {status} fixture cannot be cancelled")))),
        }
        for pending in self.submissions.iter_mut().filter(|submission| submission.status == SubmissionStatus::Pending) {
            pending.close(SubmissionStatus::Rejected, Some(actor.user), Some(format!("fixture cancelled")), now);
        }
        self.fixture.status = FixtureStatus::Cancelled;
        if let Some(reason) = reason {
            self.fixture.append_note(&format!("cancelled: {reason}"));
        }
        Ok(Applied::Changed)
    }
}

#[cfg(test)]
mod tests {
    use {
        crate::{
            fixture::{
                Participant,
                ScoreEntry,
            },
            league::MemberRole,
        },
        super::*,
    };

    const ANN: u64 = 1;
    const BO: u64 = 2;
    const CY: u64 = 3;
    const DEE: u64 = 4;
    const OWNER: u64 = 9;

    fn actor(user: u64) -> Actor {
        Actor {
            user: Id::from(user),
            role: Some(if user == OWNER { MemberRole::Owner } else { MemberRole::Member }),
        }
    }

    fn record(participants: &[(u64, Option<Side>)]) -> FixtureRecord {
        FixtureRecord {
            fixture: Fixture::new(Id::from(100), Some(1), None, participants.iter().map(|&(user, side)| Participant { user: Id::from(user), side }).collect()),
            submissions: Vec::default(),
        }
    }

    fn singles() -> FixtureRecord {
        record(&[(ANN, Some(Side::A)), (BO, Some(Side::B))])
    }

    fn claim(winner: Side, sets: &[&str]) -> ResultPayload {
        ResultPayload {
            submission_id: None,
            outcome: Outcome::Played,
            winner: Some(winner),
            score: Some(Score::Sets(sets.iter().map(|set| set.parse().unwrap()).collect())),
            forfeit_reason: None,
            notes: None,
        }
    }

    #[test]
    fn reject_returns_to_scheduled_and_resubmission_completes() {
        let mut record = singles();
        let now = Utc::now();
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-4", "6-3"]), now).unwrap(), Applied::Changed);
        let first = record.fixture.latest_submission.unwrap();
        assert_eq!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(BO), first, Decision::Reject, Some(format!("wrong score")), now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Scheduled);
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-4", "7-5"]), now).unwrap(), Applied::Changed);
        let second = record.fixture.latest_submission.unwrap();
        assert_eq!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(BO), second, Decision::Confirm, None, now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Completed);
        assert_eq!(record.fixture.winner, Some(Side::A));
        assert_eq!(record.submission(first).unwrap().status, SubmissionStatus::Rejected);
    }

    #[test]
    fn conflicting_claims_dispute_and_agreeing_claims_complete() {
        let now = Utc::now();
        let mut disputed = singles();
        assert_eq!(disputed.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-4", "6-4"]), now).unwrap(), Applied::Changed);
        assert_eq!(disputed.submit(ScoringFormat::Singles, &actor(BO), claim(Side::B, &["4-6", "4-6"]), now).unwrap(), Applied::Changed);
        assert_eq!(disputed.fixture.status, FixtureStatus::Disputed);
        assert_eq!(disputed.pending().count(), 2);

        let mut agreed = singles();
        assert_eq!(agreed.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-4", "6-4"]), now).unwrap(), Applied::Changed);
        assert_eq!(agreed.submit(ScoringFormat::Singles, &actor(BO), claim(Side::A, &["6-4", "6-4"]), now).unwrap(), Applied::Changed);
        assert_eq!(agreed.fixture.status, FixtureStatus::Completed);
        assert!(agreed.submissions.iter().all(|submission| submission.status == SubmissionStatus::Confirmed));
    }

    #[test]
    fn teammate_submission_supersedes() {
        let now = Utc::now();
        let mut record = record(&[(ANN, Some(Side::A)), (BO, Some(Side::A)), (CY, Some(Side::B)), (DEE, Some(Side::B))]);
        assert_eq!(record.submit(ScoringFormat::Doubles, &actor(ANN), claim(Side::A, &["6-1"]), now).unwrap(), Applied::Changed);
        assert_eq!(record.submit(ScoringFormat::Doubles, &actor(BO), claim(Side::A, &["6-2"]), now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::AwaitingConfirmation);
        assert_eq!(record.submissions[0].status, SubmissionStatus::Rejected);
        assert_eq!(record.submissions[0].review_reason.as_deref(), Some("superseded"));
        assert_eq!(record.pending().count(), 1);
    }

    #[test]
    fn resolving_requires_a_dispute() {
        let mut record = singles();
        let result = record.resolve(ScoringFormat::Singles, &actor(OWNER), Some(Side::A), None, Utc::now());
        assert!(matches!(result, Err(Error::InvalidTransition(_))));
    }

    #[test]
    fn resolution_confirms_matching_claim() {
        let now = Utc::now();
        let mut record = singles();
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-4", "6-4"]), now).unwrap(), Applied::Changed);
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(BO), claim(Side::B, &["4-6", "4-6"]), now).unwrap(), Applied::Changed);
        assert!(matches!(record.resolve(ScoringFormat::Singles, &actor(CY), Some(Side::B), None, now), Err(Error::Unauthorized(_))));
        assert_eq!(record.resolve(ScoringFormat::Singles, &actor(OWNER), Some(Side::B), Some(format!("umpire report")), now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Completed);
        assert_eq!(record.fixture.winner, Some(Side::B));
        assert_eq!(record.submissions[0].status, SubmissionStatus::Rejected);
        assert_eq!(record.submissions[1].status, SubmissionStatus::Confirmed);
        assert!(record.fixture.notes.as_deref().is_some_and(|notes| notes.contains("umpire report")));
    }

    #[test]
    fn outsiders_cannot_submit_or_confirm() {
        let now = Utc::now();
        let mut record = singles();
        assert!(matches!(record.submit(ScoringFormat::Singles, &actor(CY), claim(Side::A, &["6-0"]), now), Err(Error::Unauthorized(_))));
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-0"]), now).unwrap(), Applied::Changed);
        let submission = record.fixture.latest_submission.unwrap();
        assert!(matches!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(ANN), submission, Decision::Confirm, None, now), Err(Error::Unauthorized(_))));
        let rules = Rules { peer_confirmation: false, ..Rules::default() };
        assert!(matches!(record.confirm(ScoringFormat::Singles, &rules, &actor(BO), submission, Decision::Confirm, None, now), Err(Error::Unauthorized(_))));
        assert_eq!(record.confirm(ScoringFormat::Singles, &rules, &actor(OWNER), submission, Decision::Confirm, None, now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Completed);
    }

    #[test]
    fn replays_are_no_ops() {
        let now = Utc::now();
        let mut record = singles();
        let payload = ResultPayload { submission_id: Some(Id::from(77)), ..claim(Side::A, &["6-3"]) };
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), payload.clone(), now).unwrap(), Applied::Changed);
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), payload, now).unwrap(), Applied::Replayed);
        assert_eq!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(BO), Id::from(77), Decision::Confirm, None, now).unwrap(), Applied::Changed);
        assert_eq!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(BO), Id::from(77), Decision::Confirm, None, now).unwrap(), Applied::Replayed);
        assert_eq!(record.submissions.len(), 1);
    }

    #[test]
    fn replayed_confirmation_still_needs_authorization() {
        let now = Utc::now();
        let mut record = singles();
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-3"]), now).unwrap(), Applied::Changed);
        let submission = record.fixture.latest_submission.unwrap();
        assert_eq!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(BO), submission, Decision::Confirm, None, now).unwrap(), Applied::Changed);
        let stranger = Actor { user: Id::from(77), role: None };
        assert!(matches!(record.confirm(ScoringFormat::Singles, &Rules::default(), &stranger, submission, Decision::Confirm, None, now), Err(Error::Unauthorized(_))));
        assert!(matches!(record.confirm(ScoringFormat::Singles, &Rules::default(), &actor(CY), submission, Decision::Confirm, None, now), Err(Error::Unauthorized(_))));
        assert_eq!(record.fixture.status, FixtureStatus::Completed);
    }

    #[test]
    fn invalid_scores_are_rejected() {
        let now = Utc::now();
        let mut record = singles();
        assert!(matches!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::B, &["6-4", "6-4"]), now), Err(Error::Validation(_))));
        assert!(matches!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-6"]), now), Err(Error::Validation(_))));
        let forfeit = ResultPayload { outcome: Outcome::Forfeit, forfeit_reason: Some(format!("injury")), ..claim(Side::A, &["6-6"]) };
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), forfeit, now).unwrap(), Applied::Changed);
        assert_eq!(record.submissions[0].score, None);
    }

    #[test]
    fn one_sided_fixture_cannot_complete() {
        let now = Utc::now();
        let mut record = record(&[(ANN, Some(Side::A)), (BO, Some(Side::A))]);
        assert_eq!(record.submit(ScoringFormat::Doubles, &actor(ANN), claim(Side::A, &["6-0"]), now).unwrap(), Applied::Changed);
        let submission = record.fixture.latest_submission.unwrap();
        assert!(matches!(record.confirm(ScoringFormat::Doubles, &Rules::default(), &actor(OWNER), submission, Decision::Confirm, None, now), Err(Error::InvalidTransition(_))));
        assert_eq!(record.fixture.status, FixtureStatus::AwaitingConfirmation);
    }

    #[test]
    fn individual_claims_need_identical_scores() {
        let now = Utc::now();
        let mut record = record(&[(ANN, None), (BO, None)]);
        let entries = |ann, bo| ResultPayload {
            submission_id: None,
            outcome: Outcome::Played,
            winner: None,
            score: Some(Score::Entries(vec![ScoreEntry { user: Id::from(ANN), points: ann }, ScoreEntry { user: Id::from(BO), points: bo }])),
            forfeit_reason: None,
            notes: None,
        };
        assert_eq!(record.submit(ScoringFormat::IndividualPoints, &actor(ANN), entries(10, 7), now).unwrap(), Applied::Changed);
        assert_eq!(record.submit(ScoringFormat::IndividualPoints, &actor(BO), entries(10, 8), now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Disputed);
        let second = record.fixture.latest_submission.unwrap();
        assert_eq!(record.confirm(ScoringFormat::IndividualPoints, &Rules::default(), &actor(OWNER), second, Decision::Confirm, None, now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.score.as_ref().and_then(|score| score.points_of(Id::from(BO))), Some(8));
    }

    #[test]
    fn cancel_rejects_pending_claims() {
        let now = Utc::now();
        let mut record = singles();
        assert_eq!(record.submit(ScoringFormat::Singles, &actor(ANN), claim(Side::A, &["6-0"]), now).unwrap(), Applied::Changed);
        assert!(matches!(record.cancel(&actor(ANN), None, now), Err(Error::Unauthorized(_))));
        assert_eq!(record.cancel(&actor(OWNER), Some(format!("rained out")), now).unwrap(), Applied::Changed);
        assert_eq!(record.fixture.status, FixtureStatus::Cancelled);
        assert_eq!(record.pending().count(), 0);
    }
}
