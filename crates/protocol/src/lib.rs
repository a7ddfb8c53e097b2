//! Command protocol shared by the fluent client and the browser drivers.
//!
//! Defines the tagged [`Command`] set, the records commands carry, the
//! workspace-wide [`Error`] type, and the [`Driver`] trait every transport
//! implements. The queue in the client crate speaks to a driver exclusively
//! through these types.

pub mod command;
pub mod driver;
pub mod error;
pub mod types;

pub use {
    command::{Command, WaitFor},
    driver::Driver,
    error::{Error, Result},
    types::{Cookie, CookieInput, PdfOptions, Viewport},
};
