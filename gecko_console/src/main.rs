//! # Gecko Console
//!
//! Ground operator console. Commands typed at the prompt are parsed into gripper telecommands and
//! sent to the gripper exec, whose response is printed. Status reports published by the exec are
//! printed as they arrive.
//!
//! Type `help` for the list of commands, `exit` to leave.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use color_eyre::{eyre::WrapErr, Result};
use rustyline::{error::ReadlineError, Editor};
use structopt::StructOpt;

use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions},
    tc::{gecko::GeckoTc, TcResponse},
    tm::StatusReport,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "Gecko $ ";
const HISTORY_PATH: &str = "data/history.txt";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "gecko_console", about = "Gecko gripper ground console")]
struct Opt {
    /// Endpoint the telecommand socket binds to
    #[structopt(long, default_value = "tcp://*:5020")]
    tc_endpoint: String,

    /// Endpoint of the exec's status report publisher
    #[structopt(long, default_value = "tcp://localhost:5050")]
    report_endpoint: String,

    /// Time to wait for the exec to respond to a command
    #[structopt(long, default_value = "2000")]
    response_timeout_ms: i32,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();
    let ctx = zmq::Context::new();

    let tc_socket = MonitoredSocket::new(
        &ctx,
        zmq::REQ,
        SocketOptions {
            bind: true,
            block_on_first_connect: false,
            linger: 1,
            recv_timeout: opt.response_timeout_ms,
            send_timeout: 10,
            req_correlate: true,
            req_relaxed: true,
            ..Default::default()
        },
        &opt.tc_endpoint,
    )
    .wrap_err("Could not create the telecommand socket")?;

    let run = Arc::new(AtomicBool::new(true));
    let report_jh = spawn_report_printer(&ctx, &opt.report_endpoint, run.clone())
        .wrap_err("Could not subscribe to status reports")?;

    let mut rl = Editor::<(), rustyline::history::DefaultHistory>::new().wrap_err("Could not create the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line);

                match line {
                    "exit" | "quit" => break,
                    _ => parse_and_send(&tc_socket, line),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled Error: {:?}", e);
                break;
            }
        }
    }

    println!("Exiting...");
    if let Err(e) = rl.save_history(HISTORY_PATH) {
        println!("Could not save history: {}", e);
    }

    run.store(false, Ordering::Relaxed);
    report_jh.join().ok();

    Ok(())
}

/// Parse a command line and send the matching TC to the exec.
fn parse_and_send(socket: &MonitoredSocket, line: &str) {
    let cmd = match GeckoTc::from_iter_safe(std::iter::once("gecko").chain(line.split_whitespace()))
    {
        Ok(c) => c,
        // Covers help and version output as well as real errors
        Err(e) => {
            println!("{}", e);
            return;
        }
    };

    let tc = cmd.to_tc();

    if let Err(e) = socket.send(&tc.to_json(), 0) {
        println!("Could not send {}: {}", tc.name, e);
        return;
    }

    match socket.recv_string(0) {
        Ok(Ok(s)) => match serde_json::from_str::<TcResponse>(&s) {
            Ok(r) => println!("{:?}: {}", r.status, r.message),
            Err(e) => println!("Invalid response \"{}\": {}", s, e),
        },
        Ok(Err(_)) => println!("Response is not valid UTF-8"),
        Err(zmq::Error::EAGAIN) => println!("No response from the exec"),
        Err(e) => println!("Could not recieve the response: {}", e),
    }
}

/// Start a background thread printing status reports.
fn spawn_report_printer(
    ctx: &zmq::Context,
    endpoint: &str,
    run: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let socket = MonitoredSocket::new(
        ctx,
        zmq::SUB,
        SocketOptions {
            block_on_first_connect: false,
            linger: 1,
            recv_timeout: 100,
            subscribe: Some(vec![]),
            ..Default::default()
        },
        endpoint,
    )?;

    Ok(thread::spawn(move || {
        while run.load(Ordering::Relaxed) {
            match socket.recv_string(0) {
                Ok(Ok(s)) => match serde_json::from_str::<StatusReport>(&s) {
                    Ok(r) => println!("\n{}", r),
                    Err(e) => println!("\nInvalid status report: {}", e),
                },
                Ok(Err(_)) => (),
                Err(zmq::Error::EAGAIN) => (),
                Err(e) => {
                    println!("\nStatus report subscription ended: {}", e);
                    break;
                }
            }
        }
    }))
}
