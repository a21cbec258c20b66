//! # Leak Tracing
//!
//! Tabela de rastreamento opcional, habilitada via [`crate::heap::Heap::trace`].
//! Quando ativa, cada `alloc` agrupa alocações por call-site (endereço de
//! retorno do chamador) e mantém contagem + bytes totais por grupo —
//! generaliza os contadores atômicos de `mm/trace.rs` do kernel original
//! (`TRACING_ENABLED` + contadores `AtomicU64`) e o layout de
//! `mheap_trace_t`/`mheap_trace_main_t` de `clib/mheap_bootstrap.h`
//! (callers + n_allocations + n_bytes por entrada).
//!
//! Um `free` não conhece o call-site do `alloc` que produziu o offset que
//! está liberando — só o call-site do próprio `free`. Por isso a tabela
//! mantém uma tabela lateral `offset -> (entrada, bytes)` populada em
//! `record_alloc` e consultada (e removida) em `record_free`, igual ao
//! `mheap_trace_main_t::trace_by_offset` original: decrementar a entrada
//! certa exige saber em qual call-site aquele offset específico nasceu,
//! não apenas comparar o call-site do `free` contra os já registrados.
//!
//! Sem a feature `std` não há como capturar um backtrace real, então o
//! call-site vira apenas o endereço de retorno reportado por
//! `core::panic::Location` do chamador de `Heap::alloc` (precisão menor,
//! mas zero alocação e zero dependência de unwind tables).

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "std")]
use std::collections::HashMap;
#[cfg(feature = "std")]
use std::vec::Vec;

/// Uma entrada agregada por call-site.
#[derive(Debug, Clone, Copy)]
pub struct TraceEntry {
    pub call_site: &'static core::panic::Location<'static>,
    pub n_allocations: u64,
    pub n_bytes: u64,
}

/// Relatório produzido por [`super::Heap::trace_report`]: uma entrada por
/// call-site distinto que ainda tem alocações vivas.
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct TraceReport {
    pub entries: Vec<TraceEntry>,
}

/// Tabela de rastreamento mantida pelo heap enquanto `trace` está ativo.
#[cfg(feature = "std")]
#[derive(Debug, Default)]
pub struct TraceTable {
    entries: Vec<TraceEntry>,
    /// Offset do payload -> (índice em `entries`, bytes daquela alocação).
    /// É isto que deixa `record_free` achar a entrada certa sem depender
    /// do call-site do `free` coincidir com o do `alloc` original.
    live: HashMap<usize, (usize, u64)>,
}

#[cfg(feature = "std")]
impl TraceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_alloc(&mut self, offset: usize, call_site: &'static core::panic::Location<'static>, bytes: usize) {
        let idx = match self
            .entries
            .iter()
            .position(|e| locations_match(e.call_site, call_site))
        {
            Some(idx) => {
                let e = &mut self.entries[idx];
                e.n_allocations += 1;
                e.n_bytes += bytes as u64;
                idx
            }
            None => {
                self.entries.push(TraceEntry {
                    call_site,
                    n_allocations: 1,
                    n_bytes: bytes as u64,
                });
                self.entries.len() - 1
            }
        };
        self.live.insert(offset, (idx, bytes as u64));
    }

    pub fn record_free(&mut self, offset: usize) {
        if let Some((idx, bytes)) = self.live.remove(&offset) {
            let e = &mut self.entries[idx];
            e.n_allocations = e.n_allocations.saturating_sub(1);
            e.n_bytes = e.n_bytes.saturating_sub(bytes);
        }
    }

    pub fn report(&self) -> TraceReport {
        TraceReport {
            entries: self.entries.iter().copied().filter(|e| e.n_allocations > 0).collect(),
        }
    }
}

#[cfg(feature = "std")]
fn locations_match(a: &core::panic::Location<'_>, b: &core::panic::Location<'_>) -> bool {
    a.file() == b.file() && a.line() == b.line() && a.column() == b.column()
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[track_caller]
    fn here() -> &'static core::panic::Location<'static> {
        core::panic::Location::caller()
    }

    #[test]
    fn free_decrements_the_allocating_call_site_not_the_freeing_one() {
        let mut t = TraceTable::new();
        let alloc_site = here();
        t.record_alloc(100, alloc_site, 64);
        assert_eq!(t.report().entries[0].n_allocations, 1);

        // `free`'s own call site is different from `alloc`'s; a lookup
        // keyed on call-site equality would never find a match here.
        let free_site = here();
        assert!(!locations_match(alloc_site, free_site));
        t.record_free(100);

        assert!(t.report().entries.is_empty());
    }

    #[test]
    fn unknown_offset_free_is_a_no_op() {
        let mut t = TraceTable::new();
        t.record_alloc(100, here(), 64);
        t.record_free(999);
        assert_eq!(t.report().entries[0].n_allocations, 1);
    }
}
