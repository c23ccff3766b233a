//! Main gripper-side executable entry point.
//!
//! # Architecture
//!
//! The gripper exec is event driven, the main loop only handles telecommands:
//!
//!     - Background threads:
//!         - Gripper telemetry and control feedback subscribers, feeding the link
//!         - Perch worker, running automatic perch sequences
//!         - Scheduler, running TC follow-ups
//!     - Main loop:
//!         - Telecommand acquisition, from the ground or from a script
//!         - Telecommand dispatch and response
//!
//! Status reports from every part of the exec are published to the ground by the `TmServer`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use color_eyre::{eyre::WrapErr, Report};
use log::{debug, error, info, warn};
use structopt::StructOpt;

use comms_if::{eqpt::motion::Pose, net::NetParams};
use gecko_lib::{
    gecko_client::{GeckoCmdPublisher, TelemetrySubscriber},
    gripper_link::{GripperCmdSink, GripperLink},
    gripper_state::StateWatch,
    motion::{MotionClient, MotionProvider},
    params::GeckoExecParams,
    perch_seq::{PerchControl, PerchWorker},
    report::Reporter,
    sim::{SimGripper, SimGripperConfig, SimMotion},
    tc_client::{TcClient, TcClientError},
    tc_processor::{ExecContext, TcProcessor},
    tm_server::TmServer,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    script_interpreter::{PendingTcs, ScriptInterpreter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gecko_exec", about = "Gecko perching gripper executable")]
struct Opt {
    /// Use the simulated gripper and motion provider
    #[structopt(long)]
    sim: bool,

    /// TC script to run instead of recieving TCs from the ground
    #[structopt(parse(from_os_str))]
    script: Option<PathBuf>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Various sources for the telecommands incoming to the exec.
enum TcSource {
    Remote(TcClient),
    Script(ScriptInterpreter),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("gecko_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Gecko Gripper Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);
    debug!("CLI options: {:?}", opt);

    // ---- LOAD PARAMETERS ----

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;

    let exec_params: GeckoExecParams =
        util::params::load("gecko_exec.toml").wrap_err("Could not load exec params")?;
    exec_params.validate().wrap_err("Invalid exec params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = comms_if::net::zmq::Context::new();

    let tm_server = Arc::new(
        TmServer::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise TmServer")?,
    );
    let reporter: Arc<dyn Reporter> = tm_server;
    info!("TmServer initialised");

    // ---- INITIALISE GRIPPER AND MOTION ----

    let watch = Arc::new(StateWatch::new());

    let (sink, motion): (Box<dyn GripperCmdSink>, Box<dyn MotionProvider>) = if opt.sim {
        let gripper = SimGripper::new(watch.clone(), SimGripperConfig::default());
        let motion = SimMotion::new(Pose::default()).with_contact(gripper.contact_trigger());
        gripper.emit_status();
        info!("Using the simulated gripper and motion provider");
        (Box::new(gripper), Box::new(motion))
    } else {
        let publisher = GeckoCmdPublisher::new(&zmq_ctx, &net_params)
            .wrap_err("Failed to initialise GeckoCmdPublisher")?;
        let motion = MotionClient::new(&zmq_ctx, &net_params, exec_params.motion_timeout_ms)
            .wrap_err("Failed to initialise MotionClient")?;
        info!("Gripper publisher and motion client initialised");
        (Box::new(publisher), Box::new(motion))
    };

    let link = Arc::new(GripperLink::new(
        sink,
        watch,
        exec_params.link.default_error_tolerance,
    ));

    let telemetry = if opt.sim {
        None
    } else {
        let t = TelemetrySubscriber::new(&zmq_ctx, &net_params, link.clone(), reporter.clone())
            .wrap_err("Failed to initialise TelemetrySubscriber")?;
        info!("TelemetrySubscriber initialised");
        Some(t)
    };

    let perch_worker = Arc::new(PerchWorker::spawn(
        link.clone(),
        motion,
        reporter.clone(),
        exec_params.perch.clone(),
    ));
    let perch: Arc<dyn PerchControl> = perch_worker.clone();

    let tc_processor = TcProcessor::new(
        ExecContext {
            link,
            perch,
            reporter,
        },
        Duration::from_millis(exec_params.link.follow_up_delay_ms),
    );

    // ---- INITIALISE TC SOURCE ----

    let mut tc_source = match opt.script {
        Some(ref path) => {
            info!("Loading script from {:?}", path);

            let si = ScriptInterpreter::new(path).wrap_err("Failed to load script")?;

            info!(
                "Loaded script lasts {:.02} s and contains {} TCs\n",
                si.get_duration(),
                si.get_num_tcs()
            );
            TcSource::Script(si)
        }
        None => {
            info!("No script provided, remote control via the TcClient will be used\n");
            TcSource::Remote(
                TcClient::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise TcClient")?,
            )
        }
    };

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let cycle_period = Duration::from_secs_f64(exec_params.cycle_period_s);
    let mut tc_client_connected = true;

    loop {
        let cycle_start_instant = Instant::now();

        match tc_source {
            TcSource::Remote(ref client) => loop {
                match client.recieve_tc() {
                    Ok(Some(tc)) => {
                        tc_client_connected = true;
                        let response = tc_processor.exec(&tc);

                        if let Err(e) = client.send_response(&response) {
                            warn!("Could not respond to TC: {}", e);
                        }
                    }
                    Ok(None) => break,
                    Err(TcClientError::NotConnected) => {
                        if tc_client_connected {
                            error!("Connection to the ground lost");
                        }
                        tc_client_connected = false;
                        break;
                    }
                    Err(e) if !e.is_fatal() => {
                        warn!("Could not parse recieved TC: {}", e);
                        break;
                    }
                    Err(e) => {
                        return Err(e)
                            .wrap_err("An error occured while receiving TCs from the ground")
                    }
                }
            },
            TcSource::Script(ref mut si) => match si.get_pending_tcs() {
                PendingTcs::None => (),
                PendingTcs::Some(tc_vec) => {
                    for tc in tc_vec.iter() {
                        let response = tc_processor.exec(tc);
                        info!("{} -> {:?}: {}", tc.name, response.status, response.message);
                    }
                }
                // Wait for any running perch to end before leaving
                PendingTcs::EndOfScript => {
                    if !perch_worker.is_busy() {
                        info!("End of TC script reached, stopping");
                        break;
                    }
                }
            },
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Cycle overran by {:.06} s",
                cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
            ),
        }
    }

    // ---- SHUTDOWN ----

    drop(tc_processor);
    perch_worker.stop();
    drop(perch_worker);
    drop(telemetry);

    info!("End of execution");
    session.exit();

    Ok(())
}
