/*! The TCP sliding-window engine of a small-footprint TCP/IP stack.

This crate is the bookkeeping core between a connection's state machine and
the byte streams exchanged with a peer. It decides which outgoing bytes may
go on the wire right now, which incoming bytes may be delivered to the
application, which segments must be retransmitted and when, and how the
smoothed round-trip estimate evolves. It owns no sockets, no IP layer and no
payload buffers: descriptors only track *metadata* about byte ranges, while
the payload stays in the caller's stream buffers.

The moving parts:

 * [`storage::SegmentPool`] — a fixed-capacity, allocated-once pool of
   segment descriptors shared by all connections.
 * [`window::TcpWindow`] — per-connection sliding-window state: receive
   reassembly with SACK generation, transmit queueing over
   priority/wait/transmit queues, ACK and SACK ingestion, fast retransmit
   and the SRTT estimator.
 * [`wire`] — parsing and emission of the single-block SACK option.

The driver above is expected to serialize all calls; the engine performs no
locking, never blocks, and never calls into the host beyond reading the
tick counter handed to [`time::Clock`].
*/

#[macro_use]
mod macros;

pub mod config;
pub mod segment;
pub mod seq;
pub mod storage;
pub mod time;
pub mod window;
pub mod wire;
