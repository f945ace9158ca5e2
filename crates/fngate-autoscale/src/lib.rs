//! fngate-autoscale — demand-driven replica scaling.
//!
//! Every function owns at most one background scaling worker. The call
//! path raises the function's *goal* (desired replica count) whenever it
//! observes more concurrent calls than the goal; the worker asks the
//! orchestrator for that many replicas and later walks the population
//! back down once traffic subsides.
//!
//! # State machine
//!
//! ```text
//!            grow(goal)
//!   Idle ───────────────▶ ScalingUp ◀──────────────┐
//!    ▲                       │ acked >= goal        │ goal > acked
//!    │                       ▼                      │
//!    │                   Relaxing ──────────────────┤
//!    │                       │ relax timeout        │
//!    │  goal <= 1            ▼                      │
//!    └─────────────────  ScalingDown ───────────────┘
//!                            │ goal == acked
//!                            └──────▶ Relaxing
//! ```
//!
//! The goal only ever goes up through [`Scaler::grow`] and only goes down
//! inside the worker (one step per `step` window) or through
//! [`Scaler::stop`]. A goal of 0 means no worker is running.

pub mod orchestrator;
pub mod scaler;

pub use orchestrator::{BoxFuture, Orchestrator};
pub use scaler::{ScalePhase, Scaler, ScalerTimeouts};
