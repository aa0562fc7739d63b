use {
    std::{
        io,
        path::PathBuf,
        process::ExitCode,
    },
    clap::Parser as _,
    sqlx::postgres::PgPoolOptions,
    crate::{
        config::Config,
        engine::Engine,
        fixture::{
            Participant,
            Score,
            ScoreEntry,
            SetScore,
            Side,
            workflow::{
                Decision,
                Outcome,
                ResultPayload,
            },
        },
        league::{
            ActorContext,
            LeagueUpdate,
            NewLeague,
            RotationType,
            ScoringFormat,
            Sport,
            rules::{
                self,
                CURRENT_VERSION,
                Rules,
            },
        },
        prelude::*,
        repo::pg::PgRepository,
        running::RunDecision,
    },
};

mod config;
mod engine;
mod error;
mod fixture;
mod id;
mod league;
mod prelude;
mod repo;
mod running;
mod schedule;
mod standings;

fn parse_rules(arg: &str) -> Result<Rules, rules::Error> {
    Rules::migrate(CURRENT_VERSION, serde_json::from_str(arg)?)
}

fn parse_pair(arg: &str) -> Result<[Id<Users>; 2], String> {
    let (first, second) = arg.split_once(',').ok_or_else(|| format!("expected two user IDs separated by a comma, got {arg:?}"))?;
    Ok([
        first.trim().parse().map_err(|e| format!("invalid user ID {first:?}: {e}"))?,
        second.trim().parse().map_err(|e| format!("invalid user ID {second:?}: {e}"))?,
    ])
}

fn parse_goals(arg: &str) -> Result<Score, String> {
    let (a, b) = arg.split_once('-').ok_or_else(|| format!("expected goals like 3-1, got {arg:?}"))?;
    Ok(Score::Goals {
        a: a.trim().parse().map_err(|e| format!("invalid goal count {a:?}: {e}"))?,
        b: b.trim().parse().map_err(|e| format!("invalid goal count {b:?}: {e}"))?,
    })
}

fn parse_entry(arg: &str) -> Result<ScoreEntry, String> {
    let (user, points) = arg.split_once('=').ok_or_else(|| format!("expected an entry like 123=10, got {arg:?}"))?;
    Ok(ScoreEntry {
        user: user.trim().parse().map_err(|e| format!("invalid user ID {user:?}: {e}"))?,
        points: points.trim().parse().map_err(|e| format!("invalid points {points:?}: {e}"))?,
    })
}

#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    /// Path to the config file, instead of looking it up in the config directories.
    #[clap(long)]
    config: Option<PathBuf>,
    /// The user on whose behalf the command runs.
    #[clap(long, global = true)]
    actor: Option<Id<Users>>,
    /// Whether the acting user holds the premium capability.
    #[clap(long, global = true)]
    premium: bool,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Applies pending database migrations.
    Migrate,
    #[clap(flatten)]
    Engine(Command),
}

#[derive(clap::Args)]
struct ScoreArgs {
    /// Set scores from side A's perspective, e.g. `6-4,3-6,7-5`.
    #[clap(long, value_delimiter = ',', conflicts_with_all = ["goals", "points"])]
    sets: Vec<SetScore>,
    /// Goals as `A-B`.
    #[clap(long, value_parser = parse_goals, conflicts_with = "points")]
    goals: Option<Score>,
    /// Individual points as `USER=POINTS`, repeatable.
    #[clap(long = "points", value_parser = parse_entry)]
    points: Vec<ScoreEntry>,
}

impl ScoreArgs {
    fn into_score(self) -> Option<Score> {
        if !self.sets.is_empty() {
            Some(Score::Sets(self.sets))
        } else if !self.points.is_empty() {
            Some(Score::Entries(self.points))
        } else {
            self.goals
        }
    }
}

/// Engine operations, run on behalf of `--actor`.
#[derive(clap::Subcommand)]
enum Command {
    CreateLeague {
        #[clap(long)]
        name: String,
        #[clap(long)]
        sport: Sport,
        #[clap(long)]
        format: ScoringFormat,
        #[clap(long)]
        rotation: Option<RotationType>,
        #[clap(long, default_value_t = 8)]
        season_weeks: u8,
        #[clap(long)]
        start_date: Option<NaiveDate>,
        /// Rules as JSON, e.g. `{"pointsForWin": 2}`.
        #[clap(long, value_parser = parse_rules)]
        rules: Option<Rules>,
        #[clap(long)]
        owner_name: String,
    },
    JoinLeague {
        league: Id<Leagues>,
        #[clap(long)]
        display_name: String,
    },
    LeaveLeague {
        league: Id<Leagues>,
    },
    UpdateLeague {
        league: Id<Leagues>,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        sport: Option<Sport>,
        #[clap(long)]
        format: Option<ScoringFormat>,
        #[clap(long)]
        rotation: Option<RotationType>,
        #[clap(long)]
        season_weeks: Option<u8>,
        #[clap(long)]
        start_date: Option<NaiveDate>,
        #[clap(long, value_parser = parse_rules)]
        rules: Option<Rules>,
    },
    DeleteLeague {
        league: Id<Leagues>,
    },
    /// Replaces the fixed partnerships of an assigned doubles league.
    SaveTeams {
        league: Id<Leagues>,
        /// Two user IDs separated by a comma, repeatable.
        #[clap(long = "pair", value_parser = parse_pair)]
        pairs: Vec<[Id<Users>; 2]>,
    },
    GenerateSchedule {
        league: Id<Leagues>,
    },
    /// Schedules a one-off fixture.
    CreateFixture {
        league: Id<Leagues>,
        #[clap(long, value_delimiter = ',')]
        side_a: Vec<Id<Users>>,
        #[clap(long, value_delimiter = ',')]
        side_b: Vec<Id<Users>>,
        /// Entrants of an individual points fixture.
        #[clap(long, value_delimiter = ',', conflicts_with_all = ["side_a", "side_b"])]
        entrants: Vec<Id<Users>>,
        #[clap(long)]
        date: Option<NaiveDate>,
    },
    ListFixtures {
        league: Id<Leagues>,
    },
    GetFixture {
        fixture: Id<Fixtures>,
    },
    SubmitResult {
        fixture: Id<Fixtures>,
        /// Makes retries of the same claim idempotent.
        #[clap(long)]
        submission_id: Option<Id<Submissions>>,
        #[clap(long, value_enum, default_value_t = Outcome::Played)]
        outcome: Outcome,
        #[clap(long)]
        winner: Option<Side>,
        #[clap(flatten)]
        score: ScoreArgs,
        #[clap(long)]
        forfeit_reason: Option<String>,
        #[clap(long)]
        notes: Option<String>,
    },
    ConfirmResult {
        fixture: Id<Fixtures>,
        submission: Id<Submissions>,
        #[clap(value_enum)]
        decision: Decision,
        #[clap(long)]
        reason: Option<String>,
    },
    ResolveDispute {
        fixture: Id<Fixtures>,
        /// Omit to rule a draw.
        #[clap(long)]
        winner: Option<Side>,
        #[clap(long)]
        reason: Option<String>,
    },
    CancelFixture {
        fixture: Id<Fixtures>,
        #[clap(long)]
        reason: Option<String>,
    },
    Standings {
        league: Id<Leagues>,
        /// Prints the player table as CSV instead of JSON.
        #[clap(long)]
        csv: bool,
    },
    CreateSession {
        league: Id<Leagues>,
        week: u8,
        distance_meters: u32,
        #[clap(long)]
        starts_at: Option<DateTime<Utc>>,
        #[clap(long)]
        deadline: Option<DateTime<Utc>>,
    },
    OpenSession {
        session: Id<RunningSessions>,
    },
    SubmitRun {
        session: Id<RunningSessions>,
        elapsed_seconds: u32,
        distance_meters: u32,
    },
    ReviewRun {
        session: Id<RunningSessions>,
        run: Id<Runs>,
        #[clap(value_enum)]
        decision: RunDecision,
        #[clap(long)]
        note: Option<String>,
    },
    FinalizeSession {
        session: Id<RunningSessions>,
    },
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)] Config(#[from] config::Error),
    #[error(transparent)] Csv(#[from] csv::Error),
    #[error(transparent)] Engine(#[from] error::Error),
    #[error(transparent)] Io(#[from] io::Error),
    #[error(transparent)] Json(#[from] serde_json::Error),
    #[error(transparent)] Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)] Sql(#[from] sqlx::Error),
    #[error("this command needs --actor")]
    MissingActor,
}

fn print_json(value: &impl Serialize) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(engine: &Engine<PgRepository>, ctx: &ActorContext, command: Command) -> Result<(), Error> {
    match command {
        Command::CreateLeague { name, sport, format, rotation, season_weeks, start_date, rules, owner_name } => print_json(&engine.create_league(ctx, NewLeague {
            rules: rules.unwrap_or_default(),
            name, sport, format, rotation, season_weeks, start_date, owner_name,
        }).await?),
        Command::JoinLeague { league, display_name } => print_json(&engine.join_league(ctx, league, display_name).await?),
        Command::LeaveLeague { league } => Ok(engine.leave_league(ctx, league).await?),
        Command::UpdateLeague { league, name, sport, format, rotation, season_weeks, start_date, rules } => print_json(&engine.update_league(ctx, league, LeagueUpdate {
            name, sport, format, rotation, season_weeks, start_date, rules,
        }).await?),
        Command::DeleteLeague { league } => Ok(engine.delete_league(ctx, league).await?),
        Command::SaveTeams { league, pairs } => print_json(&engine.save_assigned_teams(ctx, league, &pairs).await?),
        Command::GenerateSchedule { league } => print_json(&engine.generate_schedule(ctx, league).await?),
        Command::CreateFixture { league, side_a, side_b, entrants, date } => {
            let participants = side_a.into_iter().map(|user| Participant { user, side: Some(Side::A) })
                .chain(side_b.into_iter().map(|user| Participant { user, side: Some(Side::B) }))
                .chain(entrants.into_iter().map(|user| Participant { user, side: None }))
                .collect();
            print_json(&engine.create_fixture(ctx, league, participants, date).await?)
        }
        Command::ListFixtures { league } => print_json(&engine.list_fixtures(league).await?),
        Command::GetFixture { fixture } => print_json(&engine.fixture(fixture).await?),
        Command::SubmitResult { fixture, submission_id, outcome, winner, score, forfeit_reason, notes } => print_json(&engine.submit_result(ctx, fixture, ResultPayload {
            score: score.into_score(),
            submission_id, outcome, winner, forfeit_reason, notes,
        }).await?),
        Command::ConfirmResult { fixture, submission, decision, reason } => print_json(&engine.confirm_result(ctx, fixture, submission, decision, reason).await?),
        Command::ResolveDispute { fixture, winner, reason } => print_json(&engine.resolve_dispute(ctx, fixture, winner, reason).await?),
        Command::CancelFixture { fixture, reason } => print_json(&engine.cancel_fixture(ctx, fixture, reason).await?),
        Command::Standings { league, csv: false } => print_json(&engine.get_standings(league).await?),
        Command::Standings { league, csv: true } => {
            let standings = engine.get_standings(league).await?;
            let mut writer = csv::Writer::from_writer(io::stdout());
            writer.write_record(["rank", "user", "name", "played", "wins", "draws", "losses", "metric"])?;
            for player in &standings.players {
                writer.write_record([
                    player.rank.to_string(),
                    player.user.to_string(),
                    player.name.clone(),
                    player.played.to_string(),
                    player.wins.to_string(),
                    player.draws.to_string(),
                    player.losses.to_string(),
                    player.metric.to_string(),
                ])?;
            }
            writer.flush()?;
            Ok(())
        }
        Command::CreateSession { league, week, distance_meters, starts_at, deadline } => print_json(&engine.create_running_session(ctx, league, week, distance_meters, starts_at, deadline).await?),
        Command::OpenSession { session } => print_json(&engine.open_session(ctx, session).await?),
        Command::SubmitRun { session, elapsed_seconds, distance_meters } => print_json(&engine.submit_run(ctx, session, elapsed_seconds, distance_meters).await?),
        Command::ReviewRun { session, run, decision, note } => print_json(&engine.review_run(ctx, session, run, decision, note).await?),
        Command::FinalizeSession { session } => print_json(&engine.finalize_session(ctx, session).await?),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Error> {
    let Args { config, actor, premium, subcommand } = Args::parse();
    let config = Config::load(config.as_deref()).await?;
    env_logger::Builder::new()
        .filter_level(config.log_level.unwrap_or(log::LevelFilter::Info))
        .parse_default_env()
        .init();
    let db_pool = PgPoolOptions::default()
        .max_connections(16)
        .connect_with(config.connect_options())
        .await?;
    let command = match subcommand {
        Subcommand::Migrate => {
            sqlx::migrate!().run(&db_pool).await?;
            log::info!("database is up to date");
            return Ok(ExitCode::SUCCESS)
        }
        Subcommand::Engine(command) => command,
    };
    let ctx = ActorContext { user: actor.ok_or(Error::MissingActor)?, premium };
    let engine = Engine::new(PgRepository::new(db_pool), config.schedule_seed, config.max_concurrency_retries);
    match run(&engine, &ctx, command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(Error::Engine(e)) => {
            print_json(&serde_json::json!({
                "error": e.kind(),
                "message": e.to_string(),
            }))?;
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e),
    }
}
