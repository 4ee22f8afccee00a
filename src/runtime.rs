// Sensor polling loop and drive watchdog
//
// The core never spawns threads. EventLoop is driven by its owner, either one
// pass at a time or until a stop flag is raised; EventLoopTask wraps that in a
// blocking tokio task that the caller holds and stops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messages::{DriveCommand, RuntimeHealth, Telemetry};
use crate::robot::{ByteTransport, DynamicsModel, EncoderSample, Result, Roomba, SensorValue};

/// Called with the robot, the sensor name and its new value
pub type Handler<T> = Box<dyn FnMut(&mut Roomba<T>, &str, &SensorValue) + Send>;

pub struct EventLoop<T: ByteTransport> {
    robot: Roomba<T>,
    sensors: Vec<String>,
    handlers: HashMap<String, Handler<T>>,
    odometry: Option<Odometry>,
    latest: watch::Sender<Option<Telemetry>>,
    running: bool,
    seq: u64,
    started_at: Instant,
}

struct Odometry {
    model: DynamicsModel,
    last_sample_at: Option<Instant>,
}

impl<T: ByteTransport> EventLoop<T> {
    /// One event loop per robot; two readers on one link would interleave frames
    pub fn new(robot: Roomba<T>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            robot,
            sensors: Vec::new(),
            handlers: HashMap::new(),
            odometry: None,
            latest,
            running: false,
            seq: 0,
            started_at: Instant::now(),
        }
    }

    /// Replace the streamed sensor list (duplicates dropped, order kept)
    pub fn set_sensors<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        let mut sensors: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            // fail early on unknown names rather than when streaming starts
            self.robot.registry().entry(name)?;
            if !sensors.iter().any(|s| s == name) {
                sensors.push(name.to_string());
            }
        }
        self.sensors = sensors;

        if self.running {
            self.robot.stream_samples(&self.sensors)?;
        }
        Ok(())
    }

    pub fn add_sensor(&mut self, name: &str) -> Result<()> {
        let mut names = self.sensors.clone();
        names.push(name.to_string());
        self.set_sensors(&names)
    }

    pub fn remove_sensor(&mut self, name: &str) -> Result<()> {
        let names: Vec<String> = self.sensors.iter().filter(|s| *s != name).cloned().collect();
        self.set_sensors(&names)
    }

    pub fn sensors(&self) -> &[String] {
        &self.sensors
    }

    /// Register the handler for one scalar sensor, replacing any previous one
    ///
    /// Frames carry scalar readings only, so bulk group names are rejected.
    pub fn on<F>(&mut self, sensor: &str, handler: F) -> Result<()>
    where
        F: FnMut(&mut Roomba<T>, &str, &SensorValue) + Send + 'static,
    {
        let name = self.robot.registry().by_name(sensor)?.name;
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(())
    }

    /// Dead-reckon a pose from streamed encoder readings
    pub fn track_pose(&mut self, model: DynamicsModel) {
        self.odometry = Some(Odometry {
            model,
            last_sample_at: None,
        });
    }

    pub fn dynamics(&self) -> Option<&DynamicsModel> {
        self.odometry.as_ref().map(|o| &o.model)
    }

    /// Receiver of every published telemetry snapshot; usable from any thread
    pub fn subscribe(&self) -> watch::Receiver<Option<Telemetry>> {
        self.latest.subscribe()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<Telemetry> {
        self.latest.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn robot(&mut self) -> &mut Roomba<T> {
        &mut self.robot
    }

    pub fn into_robot(self) -> Roomba<T> {
        self.robot
    }

    /// Ask the robot to start streaming the sensor list
    pub fn start_sampling(&mut self) -> Result<()> {
        self.robot.stream_samples(&self.sensors)?;
        self.running = true;
        self.started_at = Instant::now();
        Ok(())
    }

    pub fn stop_sampling(&mut self) -> Result<()> {
        self.running = false;
        self.robot.pause_stream()
    }

    /// Read one frame, run handlers, publish the snapshot
    pub fn process_events(&mut self) -> Result<Telemetry> {
        let frame = self.robot.poll()?;
        let now = Instant::now();

        for (name, value) in frame.iter() {
            if let Some(handler) = self.handlers.get_mut(name) {
                handler(&mut self.robot, name, value);
            }
        }

        let pose = match (&mut self.odometry, EncoderSample::from_frame(&frame)) {
            (Some(odometry), Some(sample)) => {
                match odometry.last_sample_at {
                    Some(last) => {
                        let elapsed = now.duration_since(last).as_secs_f64();
                        odometry.model.advance(sample, elapsed);
                    }
                    None => odometry.model.initialize_priors(sample),
                }
                odometry.last_sample_at = Some(now);
                Some(odometry.model.pose())
            }
            (Some(odometry), None) => Some(odometry.model.pose()),
            (None, _) => None,
        };

        self.seq += 1;
        let telemetry = Telemetry {
            seq: self.seq,
            elapsed_ms: now.duration_since(self.started_at).as_millis() as u64,
            pose,
            sensors: frame,
        };
        self.latest.send_replace(Some(telemetry.clone()));
        Ok(telemetry)
    }

    /// Stream and process frames until `stop` is raised
    ///
    /// Frame-level errors are logged and the next frame is awaited. Transport
    /// errors end the loop.
    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<()> {
        self.start_sampling()?;
        info!("Event loop running with {} sensor groups", self.sensors.len());

        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            match self.process_events() {
                Ok(telemetry) => debug!("Frame {} with {} readings", telemetry.seq, telemetry.sensors.len()),
                Err(e) if e.is_frame_error() => warn!("Skipping frame: {}", e),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.stop_sampling() {
            warn!("Failed to pause stream: {}", e);
        }
        info!("Event loop stopped after {} frames", self.seq);
        result
    }
}

impl<T: ByteTransport + 'static> EventLoop<T> {
    /// Run the loop on a blocking tokio thread owned by the returned task
    pub fn spawn(mut self) -> EventLoopTask<T> {
        let stop = Arc::new(AtomicBool::new(false));
        let telemetry = self.subscribe();
        let flag = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || {
            let result = self.run_until(&flag);
            (self, result)
        });
        EventLoopTask {
            stop,
            telemetry,
            handle,
        }
    }
}

/// Handle to an event loop running in the background
pub struct EventLoopTask<T: ByteTransport> {
    stop: Arc<AtomicBool>,
    telemetry: watch::Receiver<Option<Telemetry>>,
    handle: JoinHandle<(EventLoop<T>, Result<()>)>,
}

impl<T: ByteTransport + 'static> EventLoopTask<T> {
    pub fn telemetry(&self) -> watch::Receiver<Option<Telemetry>> {
        self.telemetry.clone()
    }

    /// True once the loop ended on its own (transport failure)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Raise the stop flag and wait for the loop to hand the robot back
    ///
    /// The loop comes back together with how it ended, so a transport failure
    /// still returns the robot. The outer error is a panicked task. A read
    /// already blocked on the transport finishes (or times out) first.
    pub async fn stop(self) -> Result<(EventLoop<T>, Result<()>)> {
        self.stop.store(true, Ordering::Relaxed);
        Ok(self.handle.await?)
    }
}

/// Stops the robot when drive commands go stale
pub struct DriveWatchdog {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    timeout: Duration,
}

impl DriveWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            timeout,
        }
    }

    pub fn on_command(&mut self, cmd: DriveCommand) {
        self.on_command_at(cmd, Instant::now());
    }

    pub fn on_command_at(&mut self, cmd: DriveCommand, at: Instant) {
        debug!("Drive command: {:?}", cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = at;
    }

    pub fn compute_actuation(&mut self) -> DriveCommand {
        self.compute_actuation_at(Instant::now())
    }

    /// Latest command if fresh, otherwise a stop
    pub fn compute_actuation_at(&mut self, now: Instant) -> DriveCommand {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        match self.latest_cmd {
            Some(cmd) if cmd_age <= self.timeout => {
                self.health = RuntimeHealth::Ok;
                cmd
            }
            Some(_) => {
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:?} old), stopping robot", cmd_age);
                }
                self.health = RuntimeHealth::CmdStale;
                DriveCommand::default()
            }
            None => {
                self.health = RuntimeHealth::CmdStale;
                DriveCommand::default()
            }
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }
}
