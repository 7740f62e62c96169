//! # Promgate caching infrastructure
//!
//! The gateway talks to upstream APIs that are both slow and rate-limited, so
//! every lookup that can be cached, is. This crate contains the generic
//! in-memory caching layer, our central [`CacheError`] type, and the
//! request-coalescing machinery that sits underneath it.
//!
//! ## The cache map
//!
//! [`RefreshingCache`] is a concurrency-safe `K → V` map in which every entry
//! carries two independent timers:
//!
//! - an *expiry* timer: entries that were neither overwritten nor refreshed
//!   within `expire_after` are evicted by a background sweeper, and
//! - a *refresh* timer: live entries are proactively reloaded through the
//!   cache's loader every `refresh_after`, so that hot entries stay warm
//!   without a caller ever paying for the reload.
//!
//! The two timers are evaluated independently. An entry may be refreshed many
//! times before it expires, or expire without ever having been refreshed if it
//! is configured the other way around.
//!
//! ## Request coalescing
//!
//! A cache miss invokes the loader that was supplied at construction time.
//! Concurrent misses for the same key are deduplicated: exactly one loader
//! invocation runs, and its outcome (value or error) is delivered to every
//! waiter through a shared channel. Failed loads are never committed to the
//! map, so the next miss for that key retries the loader instead of replaying
//! the failure.
//!
//! ## [`CacheContents`] / [`CacheError`]
//!
//! The caching layer deals in [`CacheContents`]s, which are just a [`Result`]
//! around a [`CacheError`]. [`CacheError`] is `Clone` on purpose: one load
//! outcome is fanned out to an arbitrary number of waiters.

mod error;
mod map;
mod singleflight;

pub use error::{CacheContents, CacheError};
pub use map::RefreshingCache;
