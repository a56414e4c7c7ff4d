//! Send a GT06 login + position frame to a running tracker server.
//!
//! Usage: cargo run --example send_gt06 [HOST] [PORT]
//!
//! Default target: 127.0.0.1:5023

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn login_frame() -> Vec<u8> {
    let mut frame = vec![0x78, 0x78, 0x0D, 0x01];
    frame.extend_from_slice(&[0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23, 0x45]);
    frame.extend_from_slice(&[0x00, 0x01]); // index
    frame.extend_from_slice(&[0x00, 0x00]); // crc (server does not verify inbound)
    frame.extend_from_slice(&[0x0D, 0x0A]);
    frame
}

fn gps_frame() -> Vec<u8> {
    let mut frame = vec![0x78, 0x78, 0x17, 0x10];
    frame.extend_from_slice(&[24, 3, 1, 8, 15, 30]); // 2024-03-01 08:15:30 UTC
    frame.push(0xC9); // gps length 12, 9 satellites
    frame.extend_from_slice(&40_500_000u32.to_be_bytes()); // 22.5 N
    frame.extend_from_slice(&205_200_000u32.to_be_bytes()); // 114.0 E
    frame.push(80); // km/h
    frame.extend_from_slice(&(0x1000u16 | 0x0400 | 270).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x02]); // index
    frame.extend_from_slice(&[0x00, 0x00, 0x0D, 0x0A]);
    frame
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let host = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = std::env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(5023);

    println!("Connecting to {host}:{port}");
    let mut stream = TcpStream::connect((host.as_str(), port)).await?;

    println!("\n[1] Sending login (IMEI 123456789012345)...");
    stream.write_all(&login_frame()).await?;
    let mut ack = [0u8; 10];
    stream.read_exact(&mut ack).await?;
    println!("    ACK: {ack:02X?}");

    println!("\n[2] Sending GPS position...");
    stream.write_all(&gps_frame()).await?;
    stream.read_exact(&mut ack).await?;
    println!("    ACK: {ack:02X?}");

    println!("\nDone.");
    Ok(())
}
