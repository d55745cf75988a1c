//! Time and entropy for the state machines.
//!
//! Every key pair, session key, IV and ephemeral secret in this crate is
//! drawn from [`Environment::random_bytes`], and every timeout is measured
//! against an `Instant` the caller passes in. A seeded environment therefore
//! replays a whole dialog session bit for bit.
//!
//! Nothing in `confdialog-core` reads the system clock, sleeps, or touches
//! an OS RNG on its own. Endpoints take `now` and `&impl Environment` as
//! arguments and keep neither.
//!
//! `SimEnv` in `confdialog-harness` backs this with Turmoil virtual time and
//! a seeded ChaCha20 stream. A production implementation backs
//! `random_bytes` with the OS entropy pool.

use std::time::Duration;

/// Clock, timer and entropy source handed to the state machines.
///
/// Implementations must keep `now()` monotonic. Outside simulations
/// `random_bytes()` must come from a CSPRNG: session keys and IVs are only as
/// unpredictable as this source.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point in time; subtracting two gives the elapsed `Duration`
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time, never earlier than a previous call
    fn now(&self) -> Self::Instant;

    /// Wait for `duration`.
    ///
    /// Driver code only; state machines expose `tick(now)` instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    ///
    /// The same seed yields the same stream in simulation.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Random fixed-size array, the shape key material comes in
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        self.random_bytes(&mut out);
        out
    }
}
