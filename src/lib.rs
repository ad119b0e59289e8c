//! A telephony switchboard hub: bridges two outbound SIP/VoIP calls and
//! records the resulting conversation.
//!
//! This crate implements the orchestrator only (see [`hub`]); the six
//! worker components it coordinates (`VoipIO`, `VAD`, `TTS` per leg) are
//! out of scope — [`workers`] defines their channel contracts and ships
//! minimal stand-ins sufficient to run and test the hub end-to-end.

pub mod audio;
pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod workers;
