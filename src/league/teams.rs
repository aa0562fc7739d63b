//! Fixed doubles partnerships.

use crate::{
    league::{
        Member,
        ScoringFormat,
    },
    prelude::*,
};

/// An unordered pair of partners, stored lowest ID first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub(crate) struct TeamPair([Id<Users>; 2]);

impl TeamPair {
    pub(crate) fn new(first: Id<Users>, second: Id<Users>) -> Self {
        Self(if first <= second { [first, second] } else { [second, first] })
    }

    pub(crate) fn players(&self) -> [Id<Users>; 2] {
        self.0
    }

    pub(crate) fn contains(&self, user: Id<Users>) -> bool {
        self.0.contains(&user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssignedTeams {
    pub(crate) pairs: Vec<TeamPair>,
    pub(crate) unpaired: Vec<Id<Users>>,
}

impl AssignedTeams {
    pub(crate) fn new(pairs: Vec<TeamPair>, members: &[Member]) -> Self {
        let unpaired = members.iter()
            .map(|member| member.user)
            .filter(|user| !pairs.iter().any(|pair| pair.contains(*user)))
            .collect();
        Self { pairs, unpaired }
    }
}

/// Checks a pairing submitted by an organizer before it is saved.
pub(crate) fn validate_pairs(pairs: &[[Id<Users>; 2]], members: &[Member]) -> Result<Vec<TeamPair>, Error> {
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(pairs.len());
    for &[first, second] in pairs {
        if first == second {
            return Err(Error::Validation(Cow::Owned(format!("user {first} cannot partner themselves"))))
        }
        for user in [first, second] {
            if !members.iter().any(|member| member.user == user) {
                return Err(Error::Validation(Cow::Owned(format!("user {user} is not a member of this league"))))
            }
            if !seen.insert(user) {
                return Err(Error::Validation(Cow::Owned(format!("user {user} is assigned to more than one team"))))
            }
        }
        validated.push(TeamPair::new(first, second));
    }
    Ok(validated)
}

/// Checks that a saved pairing can drive an assigned doubles rotation.
///
/// Saved pairings may predate roster changes, so membership is checked again here.
pub(crate) fn resolve_for_schedule(pairs: &[TeamPair], members: &[Id<Users>]) -> Result<Vec<TeamPair>, Error> {
    if members.len() < ScoringFormat::Doubles.min_players() {
        return Err(Error::InsufficientPlayers { format: ScoringFormat::Doubles, required: ScoringFormat::Doubles.min_players(), found: members.len() })
    }
    if pairs.len() < 2 {
        return Err(Error::TeamsNotConfigured(Cow::Borrowed("at least two teams are required")))
    }
    if pairs.len() % 2 != 0 {
        return Err(Error::TeamsNotConfigured(Cow::Owned(format!("an even number of teams is required, found {}", pairs.len()))))
    }
    let mut seen = HashSet::new();
    for pair in pairs {
        for user in pair.players() {
            if !members.contains(&user) {
                return Err(Error::TeamsNotConfigured(Cow::Owned(format!("user {user} is no longer a member"))))
            }
            if !seen.insert(user) {
                return Err(Error::TeamsNotConfigured(Cow::Owned(format!("user {user} is on more than one team"))))
            }
        }
    }
    Ok(pairs.iter().copied().sorted().collect())
}
