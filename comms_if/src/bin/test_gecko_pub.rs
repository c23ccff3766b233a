//! Simple gripper telemetry publisher test
//!
//! Publishes a status packet every second on the gripper states endpoint, cycling through the
//! flags, so the exec's telemetry path can be checked without hardware.

use comms_if::{
    eqpt::gecko::{self, ErrorStatus, StatusFlags, StatusPacket},
    net::{MonitoredSocket, SocketOptions}
};
use chrono::Utc;

fn main() -> Result<(), Box<dyn std::error::Error>> {

    // Create zmq context
    let ctx = zmq::Context::new();

    // Create socket options
    let socket_options = SocketOptions {
        bind: true,
        block_on_first_connect: false,
        ..Default::default()
    };

    // Create the socket
    let socket = MonitoredSocket::new(
        &ctx,
        zmq::PUB,
        socket_options,
        "tcp://*:5030"
    )?;

    println!("Gripper telemetry publisher open on port 5030");

    let masks = [
        0,
        gecko::mask::ADHESIVE_ENGAGE,
        gecko::mask::ADHESIVE_ENGAGE | gecko::mask::WRIST_LOCK,
        gecko::mask::AUTOMATIC_MODE_ENABLE,
        gecko::mask::FILE_IS_OPEN | gecko::mask::EXPERIMENT_IN_PROGRESS
    ];

    for (i, word) in masks.iter().cycle().enumerate() {
        let pkt = StatusPacket::new(
            Utc::now().timestamp() as i32,
            StatusFlags::from_word(*word),
            250,
            (i % 10) as i16,
            ErrorStatus::NoError
        );

        match socket.send(gecko::slots_to_bytes(&pkt.to_slots()), 0) {
            Ok(_) => println!("Sent status word 0x{:04X}", pkt.status_word),
            Err(e) => println!("Failed to send status: {}", e)
        }

        std::thread::sleep(std::time::Duration::from_millis(1000));
    }

    Ok(())
}
