//! Backoff exponencial com jitter para reconexão.

use rand::Rng;
use std::time::Duration;
use telemetry_core::BackoffConfig;

/// Maior fator de crescimento aceito da configuração.
pub const MAX_FACTOR: f64 = 100.0;

/// Limites e ritmo do backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_ms.max(1));
        Self {
            initial,
            max: Duration::from_millis(config.max_ms).max(initial),
            factor: if config.factor.is_nan() {
                1.0
            } else {
                config.factor.clamp(1.0, MAX_FACTOR)
            },
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }
}

/// Estado do backoff, exclusivo do supervisor.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial,
            policy,
        }
    }

    /// Espera-base da próxima falha, sem jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Registra uma falha: retorna a espera com jitter e cresce a base.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = jittered(self.current, self.policy.jitter, rng);
        // Produto fora do alcance de `Duration` satura no teto.
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.policy.factor)
            .map_or(self.policy.max, |next| next.min(self.policy.max));
        delay
    }

    /// Conexão bem-sucedida: volta ao piso.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}

/// Aplica jitter multiplicativo uniforme em `[1 - jitter, 1 + jitter]`.
pub fn jittered<R: Rng + ?Sized>(base: Duration, jitter: f64, rng: &mut R) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let multiplier = 1.0 + rng.random_range(-jitter..=jitter);
    base.mul_f64(multiplier.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn within(delay: Duration, base_secs: f64, jitter: f64) -> bool {
        let d = delay.as_secs_f64();
        d >= base_secs * (1.0 - jitter) - 1e-9 && d <= base_secs * (1.0 + jitter) + 1e-9
    }

    #[test]
    fn default_policy_matches_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial, Duration::from_secs(1));
        assert_eq!(policy.max, Duration::from_secs(120));
        assert_eq!(policy.factor, 2.0);
        assert_eq!(policy.jitter, 0.2);
    }

    #[test]
    fn grows_then_caps() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        let mut rng = StdRng::seed_from_u64(7);
        let mut bases = Vec::new();
        for _ in 0..12 {
            bases.push(backoff.current());
            backoff.next_delay(&mut rng);
        }
        assert!(bases.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(bases[0], Duration::from_secs(1));
        assert_eq!(bases[3], Duration::from_secs(8));
        assert_eq!(*bases.last().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn delays_follow_one_two_four_with_jitter() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        let mut rng = StdRng::seed_from_u64(42);
        for base in [1.0, 2.0, 4.0] {
            let delay = backoff.next_delay(&mut rng);
            assert!(within(delay, base, 0.2), "{delay:?} fora de {base}s ±20%");
        }
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            backoff.next_delay(&mut rng);
        }
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
        let delay = backoff.next_delay(&mut rng);
        assert!(within(delay, 1.0, 0.2));
    }

    #[test]
    fn jitter_is_per_attempt_not_cumulative() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..500 {
            let delay = jittered(Duration::from_secs(10), 0.2, &mut rng);
            assert!(within(delay, 10.0, 0.2));
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            jittered(Duration::from_millis(250), 0.0, &mut rng),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn config_is_sanitized() {
        let policy = BackoffPolicy::from(&BackoffConfig {
            initial_ms: 0,
            max_ms: 0,
            factor: 0.5,
            jitter: 3.0,
        });
        assert_eq!(policy.initial, Duration::from_millis(1));
        assert_eq!(policy.max, Duration::from_millis(1));
        assert_eq!(policy.factor, 1.0);
        assert_eq!(policy.jitter, 1.0);

        let huge = BackoffPolicy::from(&BackoffConfig {
            factor: f64::INFINITY,
            ..BackoffConfig::default()
        });
        assert_eq!(huge.factor, MAX_FACTOR);
    }

    #[test]
    fn unbounded_factor_saturates_at_max() {
        for factor in [f64::INFINITY, 1e20] {
            let mut backoff = Backoff::new(BackoffPolicy {
                factor,
                ..BackoffPolicy::default()
            });
            let mut rng = StdRng::seed_from_u64(5);
            let first = backoff.next_delay(&mut rng);
            assert!(within(first, 1.0, 0.2), "{first:?}");
            assert_eq!(backoff.current(), Duration::from_secs(120));
            let second = backoff.next_delay(&mut rng);
            assert!(within(second, 120.0, 0.2), "{second:?}");
            assert_eq!(backoff.current(), Duration::from_secs(120));
        }
    }
}
