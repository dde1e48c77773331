//! Operator console: wires the robot, sensor and camera sessions together
//! and drives them from stdin line commands.
//!
//! The console replaces the old widget screens with a command loop: every
//! line is one operator intent, state is printed on request as snapshot
//! copies. Run with `--sensor <ip>` against real hardware or without it for
//! a bench session with a simulated load cell.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rs_kawasaki_teleop::camera::{self, CameraSample};
use rs_kawasaki_teleop::commands::{LOWER_LIMIT_DEG, UPPER_LIMIT_DEG};
use rs_kawasaki_teleop::compensation::ForceEngine;
use rs_kawasaki_teleop::kinematics;
use rs_kawasaki_teleop::robot::{PendingCompletion, Record, RobotDispatch, RobotHandle, RobotState};
use rs_kawasaki_teleop::sensor::{self, NetFt, SensorLink, RDT_PORT};
use rs_kawasaki_teleop::session::{self, CommandQueue, SessionMonitor};
use rs_kawasaki_teleop::ticklog::TickLog;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "console", about = "Teleoperation console for the Kawasaki arm")]
struct Args {
    /// TCP port the robot controller dials in on.
    #[arg(long, default_value_t = 40000)]
    robot_port: u16,

    /// TCP port the camera board dials in on.
    #[arg(long, default_value_t = 5005)]
    camera_port: u16,

    /// Net F/T sensor host; omit to run against a simulated load cell.
    #[arg(long)]
    sensor: Option<String>,

    /// Robot session tick period, milliseconds.
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// Sensor poll period, milliseconds.
    #[arg(long, default_value_t = 100)]
    sensor_ms: u64,

    /// Default motion speed passed with move commands.
    #[arg(long, default_value_t = 20)]
    speed: i32,
}

enum ConsoleFlow {
    Continue,
    Quit,
}

struct Console {
    args: Args,
    handle: RobotHandle,
    engine: Arc<ForceEngine>,
    camera: Arc<Record<CameraSample>>,
    robot_monitor: Arc<SessionMonitor>,
    camera_monitor: Arc<SessionMonitor>,
    ticklog: Arc<Mutex<TickLog>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    let engine = Arc::new(ForceEngine::new());
    let state = Arc::new(RobotState::new());
    let pending: PendingCompletion = Arc::new(Mutex::new(None));
    let queue = Arc::new(CommandQueue::new());

    let dispatch = Arc::new(RobotDispatch::new(
        state.clone(),
        engine.clone(),
        pending.clone(),
    ));
    let robot_monitor = Arc::new(SessionMonitor::new());
    let robot_thread = session::serve(
        "kawasaki",
        args.robot_port,
        queue.clone(),
        dispatch,
        robot_monitor.clone(),
        Duration::from_millis(args.tick_ms),
        shutdown.clone(),
    )
    .context("robot listener")?;

    let camera_record = Arc::new(Record::<CameraSample>::new([0; 6]));
    let camera_monitor = Arc::new(SessionMonitor::new());
    let camera_thread = camera::serve(
        args.camera_port,
        camera_record.clone(),
        camera_monitor.clone(),
        Duration::from_millis(args.tick_ms),
        shutdown.clone(),
    )
    .context("camera listener")?;

    let link = match &args.sensor {
        Some(host) => SensorLink::Hardware(
            NetFt::connect((host.as_str(), RDT_PORT)).context("sensor link")?,
        ),
        None => {
            info!("no sensor host given, using a simulated load cell");
            SensorLink::Simulated([0; 6])
        }
    };
    let sensor_thread = sensor::spawn_poller(
        link,
        engine.clone(),
        Duration::from_millis(args.sensor_ms),
        shutdown.clone(),
    )
    .context("sensor poller")?;

    let handle = RobotHandle::new(queue, state, pending);

    // The tick log runs on its own half-second timer, like the old status
    // screen did.
    let ticklog = Arc::new(Mutex::new(TickLog::new()));
    let log_thread = {
        let ticklog = ticklog.clone();
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        thread::Builder::new()
            .name("ticklog".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    {
                        let mut log = ticklog.lock().unwrap();
                        if log.is_open() {
                            log.record(
                                &handle.joints(),
                                &handle.regulator_error(),
                                &handle.regulator_output(),
                            );
                        }
                    }
                    thread::sleep(Duration::from_millis(500));
                }
            })?
    };

    let console = Console {
        args,
        handle,
        engine,
        camera: camera_record,
        robot_monitor,
        camera_monitor,
        ticklog: ticklog.clone(),
    };

    println!("Console ready, type `help` for commands.");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match console.run(&line) {
            Ok(ConsoleFlow::Continue) => {}
            Ok(ConsoleFlow::Quit) => break,
            Err(error) => println!("error: {error:#}"),
        }
    }

    shutdown.store(true, Ordering::Relaxed);
    for handle in [robot_thread, camera_thread, sensor_thread, log_thread] {
        let _ = handle.join();
    }
    ticklog.lock().unwrap().close();
    Ok(())
}

impl Console {
    fn run(&self, line: &str) -> Result<ConsoleFlow> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, rest)) = words.split_first() else {
            return Ok(ConsoleFlow::Continue);
        };
        match cmd {
            "help" => print_help(),
            "status" => self.print_status(),
            "force" => {
                let sample = self.engine.sample();
                println!("raw+bias:    {:?}", sample.offset_corrected);
                println!("compensated: {:?}", sample.compensated);
                println!("joint Z:     {:?}", sample.joint_torques);
            }
            "camera" => {
                let data = self.camera.get();
                println!(
                    "x={} y={} r={}",
                    data[1] as f64 / 1000.0,
                    data[2] as f64 / 1000.0,
                    data[3] as f64 / 1000.0
                );
            }
            "where" => self.print_forward(),
            "limits" => self.print_limits(),
            "home1" => self.handle.home1(announce_in_position()),
            "home2" => self.handle.home2(announce_in_position()),
            "movej" => {
                let (target, speed) = parse_target(rest, self.args.speed)?;
                self.handle.move_joints(target, speed, announce_in_position());
            }
            "movec" => {
                let (target, speed) = parse_target(rest, self.args.speed)?;
                self.handle
                    .move_cartesian(target, speed, announce_in_position());
            }
            "jog" => self.jog(rest)?,
            "stop" => self.handle.stop(),
            "params" => self.handle.set_params(parse_six(rest)?),
            "setpos" => self.handle.set_position(parse_six(rest)?),
            "setdelta" => self.handle.set_delta_position(parse_six(rest)?),
            "delta" => match rest.first() {
                Some(&"on") => self.handle.delta_enable(),
                Some(&"off") => self.handle.delta_disable(),
                _ => bail!("usage: delta on|off"),
            },
            "gravity" => self.handle.toggle_gravity_mode(),
            "gravon" => self.handle.gravity_program_start(parse_six(rest)?),
            "gravoff" => self.handle.gravity_program_stop(),
            "tare" => match &self.args.sensor {
                Some(host) => {
                    NetFt::connect((host.as_str(), RDT_PORT))?.tare()?;
                    println!("sensor tared");
                }
                None => bail!("no sensor host configured"),
            },
            "log" => match rest.first() {
                Some(&"open") => {
                    let path = rest.get(1).copied().unwrap_or("ticks.log");
                    self.ticklog.lock().unwrap().open(path)?;
                    println!("logging to {path}");
                }
                Some(&"close") => self.ticklog.lock().unwrap().close(),
                _ => bail!("usage: log open [path] | log close"),
            },
            "quit" | "exit" => return Ok(ConsoleFlow::Quit),
            other => println!("unknown command `{other}`, see `help`"),
        }
        Ok(ConsoleFlow::Continue)
    }

    fn print_status(&self) {
        println!("robot:  {:?}", self.robot_monitor.state());
        println!("camera: {:?}", self.camera_monitor.state());
        println!("joints: {:?}", self.handle.joints());
        println!("pose:   {:?}", self.handle.pose());
        if let Some(text) = self.handle.last_error() {
            println!("last error: {text}");
        }
    }

    fn print_forward(&self) {
        let joints = self.handle.joints();
        let pose = kinematics::forward(&joints);
        let p = pose.translation.vector;
        let euler = kinematics::matrix_to_euler_xyz(pose.rotation.to_rotation_matrix().matrix());
        println!("tool at x={:.4} y={:.4} z={:.4} m", p.x, p.y, p.z);
        println!(
            "orientation xyz: {:.1} {:.1} {:.1} deg",
            euler[0], euler[1], euler[2]
        );
    }

    fn print_limits(&self) {
        let joints = self.handle.joints();
        for i in 0..6 {
            let marker = if joints[i] > UPPER_LIMIT_DEG[i] || joints[i] < LOWER_LIMIT_DEG[i] {
                " <- outside documented travel"
            } else {
                ""
            };
            println!(
                "J{}: {} in [{}, {}]{}",
                i + 1,
                joints[i],
                LOWER_LIMIT_DEG[i],
                UPPER_LIMIT_DEG[i],
                marker
            );
        }
    }

    fn jog(&self, rest: &[&str]) -> Result<()> {
        if rest.len() < 2 {
            bail!("usage: jog <joint 1-6> <delta> [speed]");
        }
        let joint: usize = rest[0].parse().context("joint number")?;
        if !(1..=6).contains(&joint) {
            bail!("joint must be 1..6");
        }
        let delta: i32 = rest[1].parse().context("delta")?;
        let speed = match rest.get(2) {
            Some(word) => word.parse().context("speed")?,
            None => self.args.speed,
        };
        self.handle.jog_joint(joint, delta, speed);
        Ok(())
    }
}

fn announce_in_position() -> Box<dyn FnOnce() + Send> {
    Box::new(|| info!("robot reports in position"))
}

fn parse_six(words: &[&str]) -> Result<[i32; 6]> {
    if words.len() != 6 {
        bail!("expected 6 integer values, got {}", words.len());
    }
    let mut out = [0i32; 6];
    for (slot, word) in out.iter_mut().zip(words) {
        *slot = word.parse().with_context(|| format!("bad value `{word}`"))?;
    }
    Ok(out)
}

fn parse_target(words: &[&str], default_speed: i32) -> Result<([i32; 6], i32)> {
    if words.len() == 7 {
        let speed = words[6].parse().context("speed")?;
        Ok((parse_six(&words[..6])?, speed))
    } else {
        Ok((parse_six(words)?, default_speed))
    }
}

fn print_help() {
    println!(
        "\
status                      session states, joints, pose
force                       sensor readout (raw+bias / compensated)
camera                      latest camera sample
where                       forward kinematics of the current joints
limits                      joint travel table
home1 | home2               move to a home zone
movej j1..j6 [speed]        point-to-point move by joints, degrees
movec x y z o a t [speed]   point-to-point move by coordinates
jog <joint> <delta> [speed] jog one joint
stop                        immediate stop
params p1..p6               motion parameter set
setpos x y z o a t          absolute position setpoint
setdelta dx..dt             relative position setpoint
delta on|off                allow/forbid unit displacement steps
gravity                     toggle gravity control mode
gravon g1..g6 | gravoff     start/stop the gravity program
tare                        tare the force sensor
log open [path] | log close regulator tick log
quit                        close the sessions and exit"
    );
}
