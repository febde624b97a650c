//! Resolve, download and tag tracks from the NetEase Cloud Music catalog.
//!
//! The crate is a pipeline of four stages:
//!
//! 1. [`catalog`] signs requests with [`eapi`] and resolves a track to a
//!    streaming URL, its details and lyrics;
//! 2. [`download`] fetches the stream with retries and validation;
//! 3. [`tagger`] writes title, artist, album, track number and cover;
//! 4. [`album`] runs the stages for every track of an album and reports
//!    per track what happened.
//!
//! The `ncmfetch` binary drives these stages from the command line.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod album;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod download;
pub mod eapi;
pub mod error;
pub mod http;
pub mod protocol;
pub mod tagger;
pub mod track;
pub mod util;
