//! Season fixture generation. Everything here is pure: committing a schedule is up to the caller.

use {
    rand::{
        Rng,
        seq::SliceRandom as _,
    },
    crate::{
        fixture::Side,
        league::{
            RotationType,
            ScoringFormat,
            teams::{
                self,
                TeamPair,
            },
        },
        prelude::*,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum Pairing {
    Sided {
        a: Vec<Id<Users>>,
        b: Vec<Id<Users>>,
    },
    /// All entrants compete without sides.
    Open(Vec<Id<Users>>),
}

impl Pairing {
    pub(crate) fn participants(&self) -> impl Iterator<Item = (Id<Users>, Option<Side>)> + '_ {
        let (sided, open) = match self {
            Self::Sided { a, b } => (Some((a, b)), None),
            Self::Open(entrants) => (None, Some(entrants)),
        };
        sided.into_iter()
            .flat_map(|(a, b)| a.iter().map(|user| (*user, Some(Side::A))).chain(b.iter().map(|user| (*user, Some(Side::B)))))
            .chain(open.into_iter().flatten().map(|user| (*user, None)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduledWeek {
    /// 1-based.
    pub(crate) week: u8,
    pub(crate) pairings: Vec<Pairing>,
    pub(crate) byes: Vec<Id<Users>>,
}

/// Produces the pairings for each week of a season.
///
/// `members` should be in a stable order (e.g. join order) so single round-robins are reproducible.
/// `teams` is only consulted for assigned doubles rotation.
pub(crate) fn generate<R: Rng + ?Sized>(members: &[Id<Users>], weeks: u8, format: ScoringFormat, rotation: RotationType, teams: &[TeamPair], rng: &mut R) -> Result<Vec<ScheduledWeek>, Error> {
    if weeks == 0 {
        return Err(Error::Validation(Cow::Borrowed("a season must last at least one week")))
    }
    if members.len() < format.min_players() {
        return Err(Error::InsufficientPlayers { format, required: format.min_players(), found: members.len() })
    }
    let schedule = match (format, rotation) {
        (ScoringFormat::Singles, _) => round_robin(members, weeks, |user| vec![user]),
        (ScoringFormat::Doubles, RotationType::Random) => random_sides(members, weeks, 2, rng),
        (ScoringFormat::Doubles, RotationType::Assigned) => {
            let teams = teams::resolve_for_schedule(teams, members)?;
            let unpaired = members.iter().copied().filter(|user| !teams.iter().any(|team| team.contains(*user))).collect_vec();
            round_robin(&teams, weeks, |team| team.players().to_vec())
                .into_iter()
                .map(|mut week| {
                    week.byes.extend_from_slice(&unpaired);
                    week
                })
                .collect()
        }
        (ScoringFormat::TeamVsTeam, _) => random_sides(members, weeks, members.len() / 2, rng),
        (ScoringFormat::IndividualTime | ScoringFormat::IndividualPoints, _) => (1..=weeks).map(|week| ScheduledWeek {
            week,
            pairings: vec![Pairing::Open(members.to_vec())],
            byes: Vec::default(),
        }).collect(),
    };
    log::debug!("generated {} weeks of {format} pairings for {} members", schedule.len(), members.len());
    Ok(schedule)
}

/// Index pairs of the given round of the circle method. `None` marks the bye slot of an odd field.
fn circle_pairings(count: usize, round: usize) -> Vec<[Option<usize>; 2]> {
    let slots = count + count % 2;
    let rest = slots - 1;
    let mut order = Vec::with_capacity(slots);
    order.push(0);
    order.extend((0..rest).map(|i| 1 + (i + round) % rest));
    (0..slots / 2).map(|i| [order[i], order[slots - 1 - i]].map(|idx| (idx < count).then_some(idx))).collect()
}

/// Repeats complete round-robins over `entrants` for the given number of weeks, swapping sides every other cycle.
fn round_robin<T: Copy>(entrants: &[T], weeks: u8, players: impl Fn(T) -> Vec<Id<Users>>) -> Vec<ScheduledWeek> {
    let rounds = entrants.len() + entrants.len() % 2 - 1;
    (0..weeks).map(|week_idx| {
        let week_idx = usize::from(week_idx);
        let swap = (week_idx / rounds) % 2 == 1;
        let mut pairings = Vec::default();
        let mut byes = Vec::default();
        for pair in circle_pairings(entrants.len(), week_idx % rounds) {
            match pair {
                [Some(first), Some(second)] => {
                    let (a, b) = if swap { (second, first) } else { (first, second) };
                    pairings.push(Pairing::Sided { a: players(entrants[a]), b: players(entrants[b]) });
                }
                [Some(idx), None] | [None, Some(idx)] => byes.extend(players(entrants[idx])),
                [None, None] => {}
            }
        }
        ScheduledWeek { week: week_idx as u8 + 1, pairings, byes }
    }).collect()
}

/// Reshuffles the roster every week into fixtures with `side_size` players per side.
///
/// Leftover players sit out, preferring those who have sat out the fewest times so far.
fn random_sides<R: Rng + ?Sized>(members: &[Id<Users>], weeks: u8, side_size: usize, rng: &mut R) -> Vec<ScheduledWeek> {
    let fixture_size = 2 * side_size;
    let mut bye_counts = members.iter().map(|user| (*user, 0_usize)).collect::<HashMap<_, _>>();
    (1..=weeks).map(|week| {
        let mut order = members.to_vec();
        order.shuffle(rng);
        // stable, so ties keep their shuffled order
        order.sort_by_key(|user| Reverse(bye_counts.get(user).copied().unwrap_or_default()));
        let byes = order.split_off(order.len() - order.len() % fixture_size);
        for user in &byes {
            *bye_counts.entry(*user).or_default() += 1;
        }
        order.shuffle(rng);
        let pairings = order.chunks_exact(fixture_size).map(|chunk| {
            let (a, b) = chunk.split_at(side_size);
            Pairing::Sided { a: a.to_vec(), b: b.to_vec() }
        }).collect();
        ScheduledWeek { week, pairings, byes }
    }).collect()
}
