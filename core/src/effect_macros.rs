//! Declarative macros for building effects
//!
//! Reducers in this workspace mostly emit two kinds of effects: an async call
//! into the environment whose result is fed back as an action, and a timer that
//! dispatches an action later. These macros keep both one-liners.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use nursery_core::async_effect;
///
/// async_effect! {
///     let remaining = ledger.decrement_stock(plant_id, quantity).await;
///     Some(BookingAction::StockReserved { booking_id, remaining })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Future` that immediately yields an action
///
/// Used to publish a reply through the runtime so callers waiting on the
/// action broadcast observe it.
///
/// # Example
///
/// ```rust,ignore
/// use nursery_core::emit;
///
/// emit!(BookingAction::Resolved { request_id, result: Ok(booking) })
/// ```
#[macro_export]
macro_rules! emit {
    ($action:expr) => {{
        let action = $action;
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { Some(action) }))
    }};
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use nursery_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(72 * 3600),
///     action: BookingAction::ExpireReservation { booking_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
