//! League metadata, roster and caller identity.

use {
    chrono::Days,
    crate::{
        league::rules::Rules,
        prelude::*,
    },
};

pub(crate) mod rules;
pub(crate) mod teams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "sport", rename_all = "snake_case")]
pub(crate) enum Sport {
    Tennis,
    Pickleball,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "scoring_format", rename_all = "snake_case")]
pub(crate) enum ScoringFormat {
    Singles,
    Doubles,
    TeamVsTeam,
    IndividualTime,
    IndividualPoints,
}

impl ScoringFormat {
    /// Whether participants are split into sides A and B.
    pub(crate) fn is_two_sided(&self) -> bool {
        match self {
            | Self::Singles
            | Self::Doubles
            | Self::TeamVsTeam
                => true,
            | Self::IndividualTime
            | Self::IndividualPoints
                => false,
        }
    }

    pub(crate) fn min_players(&self) -> usize {
        match self {
            Self::Singles => 2,
            Self::Doubles => 4,
            Self::TeamVsTeam => 2,
            Self::IndividualTime => 1,
            Self::IndividualPoints => 2,
        }
    }

    fn supports(&self, sport: Sport) -> bool {
        match (sport, self) {
            (Sport::Running, Self::IndividualTime | Self::IndividualPoints) => true,
            (Sport::Running, _) => false,
            (Sport::Tennis | Sport::Pickleball, Self::IndividualTime) => false,
            (Sport::Tennis | Sport::Pickleball, _) => true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "rotation_type", rename_all = "snake_case")]
pub(crate) enum RotationType {
    #[default]
    Random,
    Assigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "member_role", rename_all = "snake_case")]
pub(crate) enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub(crate) fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

serde_plain::derive_display_from_serialize!(Sport);
serde_plain::derive_fromstr_from_deserialize!(Sport);
serde_plain::derive_display_from_serialize!(ScoringFormat);
serde_plain::derive_fromstr_from_deserialize!(ScoringFormat);
serde_plain::derive_display_from_serialize!(RotationType);
serde_plain::derive_fromstr_from_deserialize!(RotationType);
serde_plain::derive_display_from_serialize!(MemberRole);
serde_plain::derive_fromstr_from_deserialize!(MemberRole);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct League {
    pub(crate) id: Id<Leagues>,
    pub(crate) name: String,
    pub(crate) sport: Sport,
    pub(crate) format: ScoringFormat,
    /// Only meaningful for doubles.
    pub(crate) rotation: Option<RotationType>,
    pub(crate) season_weeks: u8,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) rules: Rules,
    pub(crate) created_at: DateTime<Utc>,
}

impl League {
    pub(crate) fn rotation(&self) -> RotationType {
        self.rotation.unwrap_or_default()
    }

    /// The calendar date of a 1-based week of the season, if the season has a start date.
    pub(crate) fn week_date(&self, week: u8) -> Option<NaiveDate> {
        self.start_date?.checked_add_days(Days::new(7 * u64::from(week.checked_sub(1)?)))
    }
}

/// Input for creating a league.
#[derive(Debug, Clone)]
pub(crate) struct NewLeague {
    pub(crate) name: String,
    pub(crate) sport: Sport,
    pub(crate) format: ScoringFormat,
    pub(crate) rotation: Option<RotationType>,
    pub(crate) season_weeks: u8,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) rules: Rules,
    pub(crate) owner_name: String,
}

impl NewLeague {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation(Cow::Borrowed("league name must not be empty")))
        }
        if self.season_weeks == 0 {
            return Err(Error::Validation(Cow::Borrowed("a season must last at least one week")))
        }
        if !self.format.supports(self.sport) {
            return Err(Error::Validation(Cow::Owned(format!("{} leagues cannot use the {} format", self.sport, self.format))))
        }
        if self.rotation.is_some() && self.format != ScoringFormat::Doubles {
            return Err(Error::Validation(Cow::Borrowed("rotation type only applies to doubles leagues")))
        }
        Ok(())
    }
}

/// Changes to an existing league. Fields left as `None` are kept.
#[derive(Debug, Default, Clone)]
pub(crate) struct LeagueUpdate {
    pub(crate) name: Option<String>,
    pub(crate) start_date: Option<NaiveDate>,
    pub(crate) rules: Option<Rules>,
    pub(crate) sport: Option<Sport>,
    pub(crate) format: Option<ScoringFormat>,
    pub(crate) rotation: Option<RotationType>,
    pub(crate) season_weeks: Option<u8>,
}

impl LeagueUpdate {
    /// Whether this update touches fields that determine how fixtures are generated and scored.
    pub(crate) fn is_structural(&self, league: &League) -> bool {
        self.sport.is_some_and(|sport| sport != league.sport)
            || self.format.is_some_and(|format| format != league.format)
            || self.rotation.is_some_and(|rotation| Some(rotation) != league.rotation)
            || self.season_weeks.is_some_and(|weeks| weeks != league.season_weeks)
            || self.rules.as_ref().is_some_and(|rules| !rules.same_scoring(&league.rules))
    }

    pub(crate) fn apply(self, league: &League) -> Result<League, Error> {
        let mut updated = league.clone();
        if let Some(name) = self.name { updated.name = name }
        if let Some(start_date) = self.start_date { updated.start_date = Some(start_date) }
        if let Some(rules) = self.rules { updated.rules = rules }
        if let Some(sport) = self.sport { updated.sport = sport }
        if let Some(format) = self.format { updated.format = format }
        if let Some(rotation) = self.rotation { updated.rotation = Some(rotation) }
        if let Some(season_weeks) = self.season_weeks { updated.season_weeks = season_weeks }
        NewLeague {
            name: updated.name.clone(),
            sport: updated.sport,
            format: updated.format,
            rotation: updated.rotation,
            season_weeks: updated.season_weeks,
            start_date: updated.start_date,
            rules: updated.rules.clone(),
            owner_name: String::default(),
        }.validate()?;
        Ok(updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Member {
    pub(crate) user: Id<Users>,
    pub(crate) display_name: String,
    pub(crate) role: MemberRole,
    pub(crate) joined_at: DateTime<Utc>,
}

/// The authenticated caller of an engine operation, as supplied by the transport layer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActorContext {
    pub(crate) user: Id<Users>,
    /// Premium capability, only consulted when creating leagues.
    pub(crate) premium: bool,
}

/// The caller resolved against a league roster.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Actor {
    pub(crate) user: Id<Users>,
    pub(crate) role: Option<MemberRole>,
}

impl Actor {
    pub(crate) fn resolve(ctx: &ActorContext, members: &[Member]) -> Self {
        Self {
            user: ctx.user,
            role: members.iter().find(|member| member.user == ctx.user).map(|member| member.role),
        }
    }

    pub(crate) fn can_manage(&self) -> bool {
        self.role.is_some_and(|role| role.can_manage())
    }

    pub(crate) fn is_member(&self) -> bool {
        self.role.is_some()
    }

    pub(crate) fn require_manager(&self, action: &str) -> Result<(), Error> {
        if self.can_manage() {
            Ok(())
        } else {
            Err(Error::Unauthorized(Cow::Owned(format!("only league owners and admins can {action}"))))
        }
    }
}
