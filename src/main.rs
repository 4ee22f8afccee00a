use clap::{Parser, Subcommand};
use std::time::{Duration, TryFromFloatSecsError};
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomba_oi::config::{DEFAULT_BAUD, DEFAULT_PORT, READ_TIMEOUT};
use roomba_oi::robot::commands::DRIVE_STRAIGHT;
use roomba_oi::robot::{Baud, DynamicsModel, Roomba, SerialTransport};
use roomba_oi::runtime::EventLoop;
use roomba_oi::teleop;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "roomba-oi", version, about = "Roomba Open Interface tool")]
struct Cli {
    /// Serial port the robot is attached to
    #[arg(long, default_value = DEFAULT_PORT, global = true)]
    port: String,

    /// Baud rate the robot is currently listening at
    #[arg(long, default_value_t = DEFAULT_BAUD, global = true)]
    baud: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query sensors once and print them as JSON
    Sensors {
        /// Sensor or bulk group names
        #[arg(default_value = "all_sci")]
        names: Vec<String>,
    },
    /// Stream sensors as JSON lines until Ctrl-C
    Stream {
        /// Sensor or bulk group names
        #[arg(default_value = "encoders")]
        names: Vec<String>,
        /// Dead-reckon the pose from encoder readings
        #[arg(long)]
        pose: bool,
    },
    /// Drive for a while, then stop
    Drive {
        /// Speed in mm/s (-500..500)
        #[arg(long, allow_hyphen_values = true)]
        speed: i32,
        /// Turning radius in mm (-2000..2000), straight if omitted
        #[arg(long, allow_hyphen_values = true, default_value_t = DRIVE_STRAIGHT)]
        radius: i32,
        /// How long to drive
        #[arg(long, default_value_t = 1.0)]
        seconds: f64,
    },
    /// Show up to four characters on the digit display
    Display { text: String },
    /// Drive from the keyboard
    Teleop,
    /// Power the robot off
    Power,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("roomba-oi error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let baud = Baud::try_from(cli.baud)?;
    let mut robot = Roomba::open(&cli.port, baud)?;
    robot.start()?;

    match cli.command {
        Commands::Sensors { names } => {
            let frame = robot.query_list(&names)?;
            println!("{}", serde_json::to_string_pretty(&frame)?);
        }
        Commands::Stream { names, pose } => stream(robot, &names, pose).await?,
        Commands::Drive {
            speed,
            radius,
            seconds,
        } => {
            let duration = drive_duration(seconds)?;
            robot.safe()?;
            robot.drive(speed, radius)?;
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            robot.stop()?;
        }
        Commands::Display { text } => {
            robot.safe()?;
            robot.display_ascii(&text)?;
        }
        Commands::Teleop => teleop::run(&mut robot).await?,
        Commands::Power => robot.power_down()?,
    }
    Ok(())
}

/// Negative, infinite and NaN durations are rejected rather than clamped
fn drive_duration(seconds: f64) -> Result<Duration, TryFromFloatSecsError> {
    Duration::try_from_secs_f64(seconds)
}

async fn stream(robot: Roomba<SerialTransport>, names: &[String], pose: bool) -> Result<(), BoxError> {
    let mut event_loop = EventLoop::new(robot);
    event_loop.set_sensors(names)?;
    if pose {
        event_loop.track_pose(DynamicsModel::new());
    }

    let task = event_loop.spawn();
    let mut telemetry = task.telemetry();
    info!("Streaming {:?}; press Ctrl-C to stop", names);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = telemetry.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = telemetry.borrow_and_update().clone();
                if let Some(line) = latest {
                    println!("{}", serde_json::to_string(&line)?);
                }
            }
            // the loop ends by itself only on a transport failure
            _ = tokio::time::sleep(READ_TIMEOUT) => {
                if task.is_finished() {
                    break;
                }
            }
        }
    }

    let (_event_loop, outcome) = task.stop().await?;
    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_duration() {
        assert_eq!(drive_duration(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(drive_duration(0.0).unwrap(), Duration::ZERO);
        assert!(drive_duration(-1.0).is_err());
        assert!(drive_duration(f64::INFINITY).is_err());
        assert!(drive_duration(f64::NAN).is_err());
        assert!(drive_duration(1e30).is_err());
    }

    #[test]
    fn test_cli_parses_drive() {
        let cli = Cli::try_parse_from(["roomba-oi", "drive", "--speed", "-200", "--seconds", "2"]).unwrap();
        match cli.command {
            Commands::Drive {
                speed,
                radius,
                seconds,
            } => {
                assert_eq!(speed, -200);
                assert_eq!(radius, DRIVE_STRAIGHT);
                assert_eq!(seconds, 2.0);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.port, DEFAULT_PORT);
    }
}
