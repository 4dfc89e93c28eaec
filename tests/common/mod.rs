#![allow(dead_code)]

use battery_capacity_tester::{Sample, UdpScpiChannel};
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Instrument stand-in on a loopback UDP socket.
///
/// Each received command is passed to a handler that returns the reply
/// lines to send back to the channel's receive port.
pub struct FakeInstrument {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    socket: UdpSocket,
}

impl FakeInstrument {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        Self {
            addr: socket.local_addr().unwrap(),
            received: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
            socket,
        }
    }

    /// Channel to this instrument with a short RPC timeout, already started
    pub fn channel(&self, retries: u32) -> UdpScpiChannel {
        let mut channel = UdpScpiChannel::new(self.addr, 0)
            .with_rpc_timeout(Duration::from_millis(150))
            .with_retry_count(retries);
        channel.start().unwrap();
        channel
    }

    /// Start answering commands, sending replies to `channel`'s receive port
    pub fn serve<F>(&mut self, channel: &UdpScpiChannel, mut handler: F)
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let port = channel.local_addr().unwrap().port();
        let reply_to = SocketAddr::from(([127, 0, 0, 1], port));
        let socket = self.socket.try_clone().unwrap();
        let received = Arc::clone(&self.received);
        let running = Arc::clone(&self.running);

        self.thread = Some(thread::spawn(move || {
            let mut buf = [0u8; 1500];
            while running.load(Ordering::Acquire) {
                let len = match socket.recv_from(&mut buf) {
                    Ok((len, _)) => len,
                    Err(_) => continue,
                };
                let command = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                received.lock().unwrap().push(command.clone());
                for reply in handler(&command) {
                    socket.send_to(reply.as_bytes(), reply_to).unwrap();
                }
            }
        }));
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.received().iter().filter(|c| *c == command).count()
    }
}

impl Drop for FakeInstrument {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Electronic load model answering the discharge test's command set
pub struct LoadModel {
    input_on: bool,
    voltage_setpoint: String,
    current_setpoint: String,
    script: VecDeque<Sample>,
    sample: Sample,
}

impl LoadModel {
    pub fn new(script: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            input_on: false,
            voltage_setpoint: String::new(),
            current_setpoint: String::new(),
            script: script.into_iter().collect(),
            sample: Sample {
                voltage: 0.0,
                current: 0.0,
            },
        }
    }

    pub fn handle(&mut self, command: &str) -> Vec<String> {
        let reply = match command {
            ":INPut ON" => {
                self.input_on = true;
                return Vec::new();
            }
            ":INPut OFF" => {
                self.input_on = false;
                return Vec::new();
            }
            ":INPut?" => (if self.input_on { "ON" } else { "OFF" }).to_string(),
            ":VOLT?" => self.voltage_setpoint.clone(),
            ":CURR?" => self.current_setpoint.clone(),
            ":MEASure:CURRent?" => {
                if let Some(next) = self.script.pop_front() {
                    self.sample = next;
                }
                format!("{:.4}A", self.sample.current)
            }
            ":MEASure:VOLTage?" => format!("{:.3}V", self.sample.voltage),
            other => {
                if let Some(value) = other.strip_prefix(":VOLT ") {
                    self.voltage_setpoint = value.to_string();
                } else if let Some(value) = other.strip_prefix(":CURR ") {
                    self.current_setpoint = value.to_string();
                }
                return Vec::new();
            }
        };
        vec![reply]
    }
}

pub fn sample(voltage: f64, current: f64) -> Sample {
    Sample { voltage, current }
}
