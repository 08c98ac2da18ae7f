//! Drives a sender and a receiver engine over a lossy in-memory link.
//!
//! The sender appends random bytes to its transmit window and emits whatever
//! `tx_get` releases; each segment is dropped with the configured
//! probability before it reaches the receiver. The receiver acknowledges
//! (with SACK options for out-of-order arrivals) and the acknowledgements
//! travel back losslessly. The transfer must arrive intact no matter the
//! loss rate.
//!
//! ```text
//! cargo run --example lossy_link -- --count 100000 --loss 20
//! ```

use std::env;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tcpwin::segment::Segment;
use tcpwin::seq::SeqNum;
use tcpwin::storage::SegmentPool;
use tcpwin::time::Clock;
use tcpwin::window::{RxCheck, TcpWindow};
use tcpwin::wire::SackRepr;

const MSS: u32 = 1460;
const STREAM_CAPACITY: usize = 65536;

static TICKS: AtomicU32 = AtomicU32::new(0);

fn now_ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// A data segment in flight.
struct Packet {
    seq: SeqNum,
    payload: Vec<u8>,
}

fn ring_write(ring: &mut [u8], position: usize, bytes: &[u8]) {
    for (index, byte) in bytes.iter().enumerate() {
        ring[(position + index) % ring.len()] = *byte;
    }
}

fn ring_read(ring: &[u8], position: usize, length: usize) -> Vec<u8> {
    (0..length).map(|index| ring[(position + index) % ring.len()]).collect()
}

fn main() {
    env_logger::init();

    let mut opts = getopts::Options::new();
    opts.optopt("c", "count", "number of bytes to transfer", "BYTES");
    opts.optopt("l", "loss", "per-segment loss probability in percent", "PCT");
    opts.optopt("s", "seed", "random seed", "SEED");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(env::args().skip(1)) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };
    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: lossy_link [options]"));
        return;
    }
    let count: usize = matches
        .opt_str("c")
        .map(|value| value.parse().expect("invalid --count"))
        .unwrap_or(100_000);
    let loss: u32 = matches
        .opt_str("l")
        .map(|value| value.parse().expect("invalid --loss"))
        .unwrap_or(10);
    let seed: u64 = matches
        .opt_str("s")
        .map(|value| value.parse().expect("invalid --seed"))
        .unwrap_or(42);

    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..count).map(|_| rng.gen()).collect();

    let clock = Clock::new(now_ticks, 1);
    let mut pool = SegmentPool::new(vec![Segment::new(); tcpwin::config::SEGMENT_POOL_COUNT]);

    let mut sender = TcpWindow::new(clock, 65536, 65536, SeqNum(1000), SeqNum(2000), MSS);
    let mut receiver = TcpWindow::new(clock, 65536, 65536, SeqNum(2000), SeqNum(1000), MSS);

    // The sender's circular stream buffer and its bookkeeping.
    let mut tx_stream = vec![0u8; STREAM_CAPACITY];
    let mut appended = 0; // bytes handed to the window so far
    let mut retired = 0; // bytes acknowledged and reclaimed

    // The receiver assembles at its read head.
    let mut rx_stream = vec![0u8; STREAM_CAPACITY];
    let mut rx_head = 0; // ring index of the next in-order byte
    let mut received = Vec::with_capacity(count);

    let mut sent_segments = 0u32;
    let mut dropped_segments = 0u32;
    let mut iterations = 0u32;

    while received.len() < count || !sender.tx_done() {
        iterations += 1;
        assert!(iterations < 10_000_000, "transfer makes no progress");

        // Refill the transmit window from the application data.
        let in_stream = appended - retired;
        let free_space = STREAM_CAPACITY - in_stream;
        let pending = count - appended;
        if pending > 0 && free_space > 0 {
            let chunk = pending.min(free_space);
            let position = appended % STREAM_CAPACITY;
            ring_write(&mut tx_stream, position, &data[appended..appended + chunk]);
            appended += sender.tx_add(&mut pool, chunk, position, STREAM_CAPACITY);
        }

        // Emit everything the window releases right now.
        let mut packets = Vec::new();
        while let Some(tx) = sender.tx_get(&mut pool, 65536) {
            packets.push(Packet {
                seq: sender.our_sequence_number(),
                payload: ring_read(&tx_stream, tx.stream_pos, tx.len as usize),
            });
        }

        for packet in packets {
            sent_segments += 1;
            if rng.gen_range(0..100) < loss {
                dropped_segments += 1;
                continue;
            }

            let len = packet.payload.len() as u32;
            let check = receiver.rx_check(&mut pool, packet.seq, len, STREAM_CAPACITY as u32);
            if let Some(offset) = check.offset() {
                ring_write(
                    &mut rx_stream,
                    (rx_head + offset as usize) % STREAM_CAPACITY,
                    &packet.payload,
                );
            }
            if check == RxCheck::Expected {
                // Pop the arriving bytes plus whatever they unblocked.
                let deliverable = len + receiver.user_data_length();
                received.extend(ring_read(&rx_stream, rx_head, deliverable as usize));
                rx_head = (rx_head + deliverable as usize) % STREAM_CAPACITY;
            }

            // The acknowledgement path is lossless.
            if let Ok(sack) = SackRepr::parse(receiver.options()) {
                retired += sender.tx_sack(&mut pool, sack.first, sack.last) as usize;
            }
            retired += sender.tx_ack(&mut pool, receiver.rx_current()) as usize;
        }

        // Sleep until the engine wants to run again.
        match sender.tx_has_data(&pool, 65536) {
            Some(0) => {}
            Some(delay) => {
                TICKS.fetch_add(delay + 1, Ordering::Relaxed);
            }
            None => {
                TICKS.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    assert_eq!(received, data, "stream corrupted in transit");
    assert!(receiver.rx_empty());
    assert_eq!(pool.free_count(), pool.capacity());

    println!(
        "transferred {} bytes over a {}% lossy link: \
         {} segments sent, {} dropped, srtt {} ms, {} virtual ms elapsed",
        count,
        loss,
        sent_segments,
        dropped_segments,
        sender.srtt_ms(),
        now_ticks()
    );
}
