//! Laughtrack - a live performer that listens to the room and times its turns
//!
//! Audience audio and screen snapshots are scored by remote analyzers; the
//! resulting verdicts drive a turn scheduler that asks a generator service for
//! the next line and speaks it.

#![forbid(unsafe_code)]

pub mod analyzer;
pub mod config;
pub mod context;
pub mod events;
pub mod fusion;
pub mod generator;
pub mod media_in;
pub mod playback;
pub mod recorder;
pub mod resample;
pub mod scheduler;
pub mod session;
pub mod speech;
pub mod timeline;
pub mod verdict;
pub mod wav;
