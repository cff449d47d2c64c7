use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swiss_scheduler::config::AppConfig;
use swiss_scheduler::models::{
    MatchId, MatchRecord, MatchStatus, ParticipantId, PlayerId, TournamentId,
};
use swiss_scheduler::scheduler::TournamentScheduler;
use swiss_scheduler::storage::{list_tournaments, JsonlStore, StorageConfig, TournamentStore};

#[derive(Parser)]
#[command(name = "swiss-scheduler")]
#[command(about = "Swiss-system tournament scheduler")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: String,

    /// Data directory path (overrides the config file)
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a tournament awaiting participants
    Create {
        /// Tournament id (random when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// List known tournaments
    List,

    /// Register a player
    Join { tournament: String, player: String },

    /// Withdraw a participant before the start
    Leave {
        tournament: String,
        participant: String,
    },

    /// Start the tournament and create round 1
    Start {
        tournament: String,

        /// Organizer player id
        #[arg(long)]
        organizer: String,

        /// Number of rounds (defaults to scheduler.default_rounds)
        #[arg(long)]
        rounds: Option<u32>,
    },

    /// Report a match status change (e.g. "checkmate-white", "draw")
    Report {
        tournament: String,
        #[arg(name = "match")]
        match_id: String,
        status: String,
    },

    /// Show current standings
    Standings { tournament: String },

    /// Show tournament status
    Status { tournament: String },

    /// List matches
    Matches {
        tournament: String,

        /// Only this round
        #[arg(long)]
        round: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(Path::new(&cli.config))
        .with_context(|| format!("Failed to load config from {}", cli.config))?;
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = PathBuf::from(data_dir);
    }
    let log_level = cli.log_level.clone().unwrap_or(config.log_level.clone());

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(cli.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::debug!("Starting swiss-scheduler v{}", env!("CARGO_PKG_VERSION"));

    let storage = StorageConfig::new(config.data_dir.clone());
    let store: Arc<dyn TournamentStore> = Arc::new(JsonlStore::new(storage.clone()));
    let scheduler_config = &config.scheduler;

    match cli.command {
        Commands::Create { id } => {
            let id = id.map(TournamentId::from).unwrap_or_else(TournamentId::random);
            let scheduler = TournamentScheduler::create(store, scheduler_config, id).await?;
            println!("{}", scheduler.id());
        }

        Commands::List => {
            let ids = list_tournaments(&storage)?;
            if ids.is_empty() {
                println!("No tournaments found.");
            }
            for id in ids {
                match store.get_tournament(&id).await? {
                    Some(t) => println!(
                        "{}  {} round {}/{}",
                        t.id, t.status, t.rounds_completed, t.rounds_total
                    ),
                    None => println!("{}  (no tournament record)", id),
                }
            }
        }

        Commands::Join { tournament, player } => {
            let mut scheduler = open(store, scheduler_config, &tournament).await?;
            let participant = scheduler.join(PlayerId::from(player)).await?;
            println!("{} (seed {})", participant.id, participant.seed);
        }

        Commands::Leave {
            tournament,
            participant,
        } => {
            let mut scheduler = open(store, scheduler_config, &tournament).await?;
            scheduler.leave(&ParticipantId::from(participant)).await?;
            println!("Withdrawn.");
        }

        Commands::Start {
            tournament,
            organizer,
            rounds,
        } => {
            let mut scheduler = open(store, scheduler_config, &tournament).await?;
            let rounds = rounds.unwrap_or(scheduler_config.default_rounds);
            let round = scheduler.start(PlayerId::from(organizer), rounds).await?;

            println!("=== Round {} of {} ===", round.round, rounds);
            for m in scheduler.round_matches(round.round).await? {
                print_match(&m);
            }
            if let Some(bye) = &round.bye {
                println!("Bye: {}", bye);
            }
        }

        Commands::Report {
            tournament,
            match_id,
            status,
        } => {
            let status: MatchStatus = status.parse().map_err(anyhow::Error::msg)?;
            let mut scheduler = open(store.clone(), scheduler_config, &tournament).await?;
            let record = store
                .update_match_status(&MatchId::from(match_id), status)
                .await?;
            let outcome = scheduler.on_match_event(&record).await?;

            println!("{}: {:?}", record.id, outcome);
            let t = scheduler.tournament();
            println!(
                "Tournament {}: {} (round {}/{})",
                t.id, t.status, t.current_round, t.rounds_total
            );
        }

        Commands::Standings { tournament } => {
            let scheduler = open(store, scheduler_config, &tournament).await?;
            let standings = scheduler.standings();
            let players = scheduler.participants();

            println!("{:<4} {:<20} {:>6} {:>5}", "#", "Player", "Score", "Byes");
            for (rank, s) in standings.iter().enumerate() {
                let name = players
                    .iter()
                    .find(|p| p.id == s.participant_id)
                    .map(|p| p.player_id.as_str())
                    .unwrap_or(s.participant_id.as_str());
                println!("{:<4} {:<20} {:>6.1} {:>5}", rank + 1, name, s.score, s.byes);
            }
        }

        Commands::Status { tournament } => {
            let scheduler = open(store, scheduler_config, &tournament).await?;
            println!("{}", serde_json::to_string_pretty(scheduler.tournament())?);
        }

        Commands::Matches { tournament, round } => {
            let id = TournamentId::from(tournament);
            let matches = match round {
                Some(round) => store.query_matches_by_round(&id, round).await?,
                None => store.query_matches(&id).await?,
            };
            if matches.is_empty() {
                println!("No matches.");
            }
            for m in &matches {
                print_match(m);
            }
        }
    }

    Ok(())
}

async fn open(
    store: Arc<dyn TournamentStore>,
    config: &swiss_scheduler::config::SchedulerConfig,
    tournament: &str,
) -> Result<TournamentScheduler> {
    let id = TournamentId::from(tournament);
    TournamentScheduler::load(store, config, &id)
        .await
        .with_context(|| format!("Failed to open tournament {}", id))
}

fn print_match(m: &MatchRecord) {
    let round = m.round.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
    println!(
        "[{}] {}  {} vs {}  {}",
        round, m.id, m.white, m.black, m.status
    );
}
