//! Buffer de retransmissão limitado com descarte do mais antigo.
//!
//! Fica entre o sampler e a sessão WebSocket. `push` nunca bloqueia: com o
//! buffer cheio, o registro mais antigo é descartado para abrir espaço ao
//! novo, favorecendo amostras recentes. `pop_batch` espera pelo primeiro
//! registro e então completa o lote apenas com o que já está disponível.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A cada quantos descartes acumulados um aviso é emitido.
pub const DROP_REPORT_EVERY: u64 = 10;

/// Resultado de um [`RelayBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Havia espaço livre.
    Stored,
    /// O registro mais antigo foi descartado para caber o novo.
    Evicted {
        /// Total de descartes desde a criação do buffer
        dropped_total: u64,
        /// Se este descarte disparou o aviso periódico
        reported: bool,
    },
}

/// Indica se o total acumulado de descartes deve gerar aviso.
pub fn drop_report_due(dropped_total: u64) -> bool {
    dropped_total > 0 && dropped_total % DROP_REPORT_EVERY == 0
}

struct Slots<T> {
    queue: VecDeque<T>,
    dropped: u64,
}

/// Fila FIFO de capacidade fixa compartilhada entre feeder e writer.
pub struct RelayBuffer<T> {
    capacity: usize,
    slots: Mutex<Slots<T>>,
    available: Notify,
}

impl<T> RelayBuffer<T> {
    /// Cria um buffer com a capacidade dada (mínimo 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Mutex::new(Slots {
                queue: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            available: Notify::new(),
        }
    }

    // O lock nunca atravessa um await; um panic com o lock não invalida a fila.
    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adiciona um registro sem bloquear.
    ///
    /// Cheio, remove exatamente o mais antigo e incrementa o contador de
    /// descartes; remoção e inserção acontecem sob o mesmo lock.
    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut slots = self.lock();
            if slots.queue.len() >= self.capacity {
                slots.queue.pop_front();
                slots.dropped += 1;
                slots.queue.push_back(item);
                PushOutcome::Evicted {
                    dropped_total: slots.dropped,
                    reported: drop_report_due(slots.dropped),
                }
            } else {
                slots.queue.push_back(item);
                PushOutcome::Stored
            }
        };

        self.available.notify_one();

        if let PushOutcome::Evicted {
            dropped_total,
            reported: true,
        } = outcome
        {
            warn!(
                total_dropped = dropped_total,
                capacity = self.capacity,
                "⚠ Backpressure: amostras antigas descartadas"
            );
        }
        outcome
    }

    /// Retira até `max_count` registros em ordem FIFO.
    ///
    /// Espera até haver ao menos um registro ou até `cancel` disparar (nesse
    /// caso retorna vazio). Depois do primeiro, não espera mais: devolve o
    /// lote parcial se a fila esvaziar.
    pub async fn pop_batch(&self, max_count: usize, cancel: &CancellationToken) -> Vec<T> {
        let max_count = max_count.max(1);
        loop {
            // Registrar interesse antes de olhar a fila evita perder o aviso
            // de um push concorrente.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take(max_count);
            if !batch.is_empty() {
                return batch;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Vec::new(),
                _ = &mut notified => {}
            }
        }
    }

    fn take(&self, max_count: usize) -> Vec<T> {
        let mut slots = self.lock();
        let count = max_count.min(slots.queue.len());
        slots.queue.drain(..count).collect()
    }

    /// Registros atualmente no buffer.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total de registros descartados por backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn pop_now(buffer: &RelayBuffer<u32>, max: usize) -> Vec<u32> {
        buffer.pop_batch(max, &CancellationToken::new()).await
    }

    #[test]
    fn push_below_capacity_stores() {
        let buffer = RelayBuffer::new(3);
        assert_eq!(buffer.push(1), PushOutcome::Stored);
        assert_eq!(buffer.push(2), PushOutcome::Stored);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped_count(), 0);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let buffer = RelayBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dropped_count(), 1);
    }

    #[test]
    fn push_never_exceeds_capacity() {
        let buffer = RelayBuffer::new(4);
        for i in 0..1_000 {
            buffer.push(i);
            assert!(buffer.len() <= 4);
        }
        assert_eq!(buffer.dropped_count(), 996);
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let buffer = RelayBuffer::new(10);
        for i in 1..=6 {
            buffer.push(i);
        }
        assert_eq!(pop_now(&buffer, 4).await, vec![1, 2, 3, 4]);
        assert_eq!(pop_now(&buffer, 4).await, vec![5, 6]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let buffer = RelayBuffer::new(3);
        for i in 1..=4 {
            buffer.push(i);
        }
        assert_eq!(pop_now(&buffer, 10).await, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn capacity_five_scenario() {
        let buffer = RelayBuffer::new(5);
        for i in 1..=8 {
            buffer.push(i);
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.dropped_count(), 3);
        assert_eq!(pop_now(&buffer, 10).await, vec![4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn batch_is_bounded() {
        let buffer = RelayBuffer::new(100);
        for i in 0..25 {
            buffer.push(i);
        }
        assert_eq!(pop_now(&buffer, 10).await.len(), 10);
        assert_eq!(pop_now(&buffer, 10).await.len(), 10);
        // Retorna menos apenas quando a fila esgota
        assert_eq!(pop_now(&buffer, 10).await, vec![20, 21, 22, 23, 24]);
    }

    #[test]
    fn drop_warning_cadence() {
        let buffer = RelayBuffer::new(1);
        buffer.push(0);
        for expected_total in 1..=35u64 {
            match buffer.push(expected_total as u32) {
                PushOutcome::Evicted {
                    dropped_total,
                    reported,
                } => {
                    assert_eq!(dropped_total, expected_total);
                    assert_eq!(
                        reported,
                        matches!(expected_total, 10 | 20 | 30),
                        "descarte #{expected_total}"
                    );
                }
                PushOutcome::Stored => panic!("buffer cheio deveria descartar"),
            }
        }
    }

    #[test]
    fn report_due_only_on_multiples_of_ten() {
        assert!(!drop_report_due(0));
        assert!((1..10).all(|n| !drop_report_due(n)));
        assert!(drop_report_due(10));
        assert!((11..20).all(|n| !drop_report_due(n)));
        assert!(drop_report_due(20));
        assert!(drop_report_due(30));
    }

    #[tokio::test(start_paused = true)]
    async fn pop_waits_for_first_record() {
        let buffer = Arc::new(RelayBuffer::new(10));
        let producer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            producer.push(7u32);
        });

        let started = tokio::time::Instant::now();
        let batch = pop_now(&buffer, 10).await;
        assert_eq!(batch, vec![7]);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_does_not_wait_for_company() {
        let buffer = Arc::new(RelayBuffer::new(10));
        buffer.push(1u32);
        let producer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            producer.push(2);
        });

        assert_eq!(pop_now(&buffer, 10).await, vec![1]);
        assert_eq!(pop_now(&buffer, 10).await, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_empty() {
        let buffer: RelayBuffer<u32> = RelayBuffer::new(10);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        assert!(buffer.pop_batch(10, &cancel).await.is_empty());
    }

    #[test]
    fn push_returns_while_full_and_unconsumed() {
        let buffer = RelayBuffer::new(2);
        let started = std::time::Instant::now();
        for i in 0..10_000u32 {
            buffer.push(i);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(buffer.len(), 2);
    }
}
