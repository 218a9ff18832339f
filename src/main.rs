//! territoryd - Entry Point
//!
//! Loads configuration, opens the JSON store, starts the territory service
//! and runs a line-based console for driving actors, factions and flags.
//! Without `--realtime` the logical clock only moves on `tick` / `run <n>`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;
use clap::Parser;
use tokio::runtime::Runtime;

use territory_control::core::clock::{Clock, ManualClock, SystemClock};
use territory_control::core::config::{LiveConfig, TerritoryConfig};
use territory_control::core::error::SystemError;
use territory_control::core::types::{ActorId, FactionId, WorldPos};
use territory_control::faction::Departure;
use territory_control::ports::{ActorSense, JsonStore, Roster, TracingNotifier};
use territory_control::service::TerritoryService;

/// Territory control daemon with an interactive console
#[derive(Parser, Debug)]
#[command(name = "territoryd")]
#[command(about = "Run the faction and flag-capture engine with a console")]
struct Args {
    /// TOML configuration file; defaults are used if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for persisted factions, flags and players
    #[arg(long, default_value = "territory-data")]
    data_dir: PathBuf,

    /// Drive jobs from wall-clock time instead of manual ticks
    #[arg(long)]
    realtime: bool,
}

/// Console-side state: the simulated world and actor nicknames
struct Console {
    service: TerritoryService,
    roster: Arc<Roster>,
    manual: Option<Arc<ManualClock>>,
    actors: AHashMap<String, ActorId>,
    config_path: Option<PathBuf>,
}

fn main() -> Result<(), SystemError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("territory_control=info")),
        )
        .init();

    tracing::info!("territoryd starting...");

    let config = match &args.config {
        Some(path) => TerritoryConfig::load(path)?,
        None => TerritoryConfig::default(),
    };
    let config = Arc::new(LiveConfig::new(config));

    let manual = (!args.realtime).then(|| Arc::new(ManualClock::new(0)));
    let clock: Arc<dyn Clock> = match &manual {
        Some(clock) => clock.clone(),
        None => Arc::new(SystemClock),
    };

    let rt = Runtime::new()?;
    let enter = rt.enter();

    let store = Arc::new(JsonStore::open(&args.data_dir)?);
    let roster = Arc::new(Roster::new());
    let service = TerritoryService::start(
        store,
        roster.clone(),
        Arc::new(TracingNotifier),
        config,
        clock,
    )?;
    if args.realtime {
        service.spawn_scheduler();
    }

    let mut console = Console {
        service,
        roster,
        manual,
        actors: AHashMap::new(),
        config_path: args.config,
    };

    print_help();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let words: Vec<&str> = input.split_whitespace().collect();
        let Some((command, rest)) = words.split_first() else {
            continue;
        };

        if *command == "quit" || *command == "q" {
            break;
        }
        if let Err(message) = console.execute(command, rest) {
            println!("{}", message);
        }
    }

    drop(enter);
    let report = rt.block_on(console.service.shutdown());
    println!(
        "Saved {} records ({} could not be written).",
        report.written, report.failed
    );
    Ok(())
}

fn print_help() {
    println!("\n=== TERRITORY CONTROL ===");
    println!();
    println!("Commands:");
    println!("  tick / t                          - Advance one second of logical time");
    println!("  run <n>                           - Advance n seconds");
    println!("  spawn <actor> <world> <x> <y> <z> - Bring an actor online with a banner");
    println!("  (<actor> is a nickname or a raw actor id from a previous run)");
    println!("  move <actor> <x> <y> <z>          - Move an actor within its world");
    println!("  disconnect <actor>                - Take an actor offline");
    println!("  create <actor> <faction>          - Found a faction (cost is paid for you)");
    println!("  join <actor> <faction>            - Join a faction");
    println!("  leave <actor>                     - Leave the actor's faction");
    println!("  marshall <actor> <member>         - Lord appoints a marshall");
    println!("  war <faction> <faction>           - Declare war");
    println!("  peace <faction> <faction>         - Make peace");
    println!("  flag <name> <world> <x> <y> <z>   - Place a flag");
    println!("  capture <actor> <flag>            - Start capturing a flag");
    println!("  cancel <actor>                    - Cancel a capture");
    println!("  status / s                        - Show factions and flags");
    println!("  save                              - Write pending changes now");
    println!("  reload                            - Re-read the configuration file");
    println!("  quit / q                          - Exit");
    println!();
}

fn coords(words: &[&str]) -> Result<(f64, f64, f64), String> {
    match words {
        [x, y, z] => {
            let parse = |s: &str| s.parse::<f64>().map_err(|_| format!("bad coordinate '{}'", s));
            Ok((parse(*x)?, parse(*y)?, parse(*z)?))
        }
        _ => Err("expected <x> <y> <z>".into()),
    }
}

/// Resolve a console nickname, or a raw actor id for restored members
fn lookup_actor(actors: &AHashMap<String, ActorId>, name: &str) -> Result<ActorId, String> {
    if let Some(id) = actors.get(name) {
        return Ok(*id);
    }
    name.parse::<ActorId>().map_err(|_| format!("unknown actor '{}'", name))
}

impl Console {
    fn actor(&self, name: &str) -> Result<ActorId, String> {
        lookup_actor(&self.actors, name)
    }

    fn faction(&self, name: &str) -> Result<FactionId, String> {
        self.service
            .registry()
            .get_by_name(name)
            .map(|f| f.id)
            .ok_or_else(|| format!("unknown faction '{}'", name))
    }

    fn advance(&self, seconds: u64) -> Result<(), String> {
        let Some(clock) = &self.manual else {
            return Err("the scheduler runs on wall-clock time in --realtime mode".into());
        };
        for _ in 0..seconds {
            clock.advance(1000);
            self.service.run_due();
        }
        println!("Logical time is now {}s.", clock.now() / 1000);
        Ok(())
    }

    fn execute(&mut self, command: &str, args: &[&str]) -> Result<(), String> {
        match (command, args) {
            ("tick" | "t", []) => self.advance(1),
            ("run", [n]) => {
                let n = n.parse::<u64>().map_err(|_| "Usage: run <number>".to_string())?;
                self.advance(n)
            }
            ("status" | "s", []) => {
                self.print_status();
                Ok(())
            }
            ("spawn", [name, world, rest @ ..]) => {
                let (x, y, z) = coords(rest)?;
                let id = match name.parse::<ActorId>() {
                    Ok(id) => id,
                    Err(_) => *self.actors.entry(name.to_string()).or_default(),
                };
                self.roster.spawn(id, WorldPos::new(*world, x, y, z));
                let item = self.service.config().get().flags.capture_item;
                self.roster.give_item(id, &item);
                println!("{} is online ({}).", name, id);
                Ok(())
            }
            ("move", [name, rest @ ..]) => {
                let id = self.actor(name)?;
                let (x, y, z) = coords(rest)?;
                let world = self
                    .roster
                    .position(id)
                    .map(|p| p.world)
                    .ok_or_else(|| format!("{} has no position", name))?;
                self.roster.move_to(id, WorldPos::new(world, x, y, z));
                Ok(())
            }
            ("disconnect", [name]) => {
                let id = self.actor(name)?;
                self.roster.set_online(id, false);
                self.service.on_disconnect(id);
                Ok(())
            }
            ("create", [name, faction]) => {
                let id = self.actor(name)?;
                let cost = self.service.config().get().factions.creation_cost;
                let created = self
                    .service
                    .create_faction(faction, faction, id, cost)
                    .map_err(|e| e.to_string())?;
                println!("Founded {} ({}).", created.name, created.id);
                Ok(())
            }
            ("join", [name, faction]) => {
                let id = self.actor(name)?;
                let faction = self.faction(faction)?;
                self.service.join_faction(id, faction).map_err(|e| e.to_string())
            }
            ("leave", [name]) => {
                let id = self.actor(name)?;
                match self.service.leave_faction(id).map_err(|e| e.to_string())? {
                    Departure::Left { .. } => println!("{} left.", name),
                    Departure::Succeeded { new_lord, .. } => {
                        println!("{} left; {} is the new lord.", name, new_lord)
                    }
                    Departure::Disbanded(d) => println!("{} was disbanded.", d.faction.name),
                }
                Ok(())
            }
            ("marshall", [lord, member]) => {
                let lord = self.actor(lord)?;
                let member = self.actor(member)?;
                let faction = self
                    .service
                    .registry()
                    .require_lord(lord)
                    .map_err(|e| e.to_string())?;
                self.service
                    .add_marshall(faction, member)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            ("war", [a, b]) => {
                let (a, b) = (self.faction(a)?, self.faction(b)?);
                self.service.declare_war(a, b).map_err(|e| e.to_string())
            }
            ("peace", [a, b]) => {
                let (a, b) = (self.faction(a)?, self.faction(b)?);
                self.service.make_peace(a, b).map_err(|e| e.to_string())
            }
            ("flag", [name, world, rest @ ..]) => {
                let (x, y, z) = coords(rest)?;
                let flag = self
                    .service
                    .create_flag(name, WorldPos::new(*world, x, y, z))
                    .map_err(|e| e.to_string())?;
                println!("Placed {} ({}).", flag.name, flag.id);
                Ok(())
            }
            ("capture", [name, flag]) => {
                let id = self.actor(name)?;
                let flag = self
                    .service
                    .engine()
                    .flag_by_name(flag)
                    .ok_or_else(|| format!("unknown flag '{}'", flag))?;
                self.service
                    .start_capture(id, flag.id)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            ("cancel", [name]) => {
                let id = self.actor(name)?;
                if self.service.cancel_capture(id).is_none() {
                    println!("Nothing to cancel.");
                }
                Ok(())
            }
            ("save", []) => {
                let report = self.service.flush();
                println!("Wrote {} records, {} pending.", report.written, report.failed);
                Ok(())
            }
            ("reload", []) => {
                let path = self
                    .config_path
                    .as_ref()
                    .ok_or_else(|| "no --config file to reload".to_string())?;
                self.service.reload_config(path).map_err(|e| e.to_string())
            }
            _ => Err(format!("Unknown command '{}'. Type 'quit' to exit.", command)),
        }
    }

    fn print_status(&self) {
        let registry = self.service.registry();
        let engine = self.service.engine();

        println!("\n--- Factions ---");
        for faction in registry.all() {
            let enemies: Vec<String> = faction
                .war_declarations
                .iter()
                .map(|id| id.to_string())
                .collect();
            println!(
                "  {} [{}] lord {} | {} members | {} flags | at war with: {}",
                faction.display_name,
                faction.id,
                faction.lord,
                registry.members_of(faction.id).len(),
                engine.flags_owned_by(faction.id).len(),
                if enemies.is_empty() {
                    "nobody".to_string()
                } else {
                    enemies.join(", ")
                }
            );
        }

        println!("--- Flags ---");
        for flag in engine.all_flags() {
            let owner = engine
                .flag_info(flag.id)
                .and_then(|info| info.owner_name)
                .unwrap_or_else(|| "neutral".to_string());
            println!(
                "  {} [{}] at {} {:.0},{:.0},{:.0} | owner: {}",
                flag.name, flag.id, flag.position.world, flag.position.x, flag.position.y, flag.position.z, owner
            );
        }

        println!("--- Actors ---");
        let mut names: Vec<&String> = self.actors.keys().collect();
        names.sort();
        for name in names {
            let id = self.actors[name];
            let faction = registry
                .faction_of(id)
                .map(|f| f.name)
                .unwrap_or_else(|| "-".to_string());
            let session = engine
                .session_of(id)
                .and_then(|s| engine.flag(s.flag))
                .map(|f| format!(" capturing {}", f.name))
                .unwrap_or_default();
            println!("  {} ({}){}", name, faction, session);
        }
        println!(
            "Pending writes: {}\n",
            self.service.checkpoint().pending()
        );
    }
}
