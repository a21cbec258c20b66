//! # Per-CPU Heap Registry
//!
//! O header original resolve "o heap atual" através de uma variável global
//! por CPU. Expor o mesmo atalho em Rust sem um mutável global implícito
//! (ver DESIGN.md, Open Question c) significa tornar o registro um valor
//! explícito que o chamador cria e passa adiante — aqui, [`CpuHeapTable`].
//!
//! Escrever um slot é responsabilidade exclusiva do dono daquele índice de
//! CPU; ler de qualquer thread é seguro (um ponteiro obsoleto aponta para
//! um heap válido, só não necessariamente o "atual"). Essa convenção de
//! single-writer, não o tipo, é o que torna `Sync` correto aqui — o mesmo
//! contrato informal que `mm/alloc/percpu.rs` do kernel original assume
//! para seus `PerCpuCache` por núcleo.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::config::MAX_CPUS;
use crate::heap::Heap;
use crate::vm::VmRegion;

/// Identifica a CPU (ou thread, fora de um kernel) chamadora.
pub trait CpuId {
    fn current() -> u32;
}

/// Registro de heaps "correntes" por CPU, indexado por [`CpuId::current`].
pub struct CpuHeapTable<R: VmRegion> {
    slots: [Cell<Option<NonNull<Heap<R>>>>; MAX_CPUS],
}

impl<R: VmRegion> CpuHeapTable<R> {
    pub fn new() -> Self {
        Self {
            slots: [(); MAX_CPUS].map(|_| Cell::new(None)),
        }
    }

    /// Publica `heap` como o heap corrente da CPU `cpu`.
    ///
    /// # Safety
    /// `heap` deve permanecer válido (não ser movido ou descartado) por
    /// todo o tempo em que algum leitor puder observar este slot.
    pub unsafe fn set_current(&self, cpu: u32, heap: &Heap<R>) {
        let ptr = NonNull::from(heap);
        self.slots[cpu as usize % MAX_CPUS].set(Some(ptr));
    }

    /// Remove o heap corrente da CPU `cpu`, se houver.
    pub fn clear_current(&self, cpu: u32) {
        self.slots[cpu as usize % MAX_CPUS].set(None);
    }

    /// Heap corrente da CPU `cpu`, se algum foi publicado e ainda é válido.
    ///
    /// # Safety
    /// O chamador deve garantir que o ponteiro publicado por
    /// `set_current` ainda é válido (não foi liberado nem movido).
    pub unsafe fn current(&self, cpu: u32) -> Option<&Heap<R>> {
        self.slots[cpu as usize % MAX_CPUS]
            .get()
            .map(|ptr| ptr.as_ref())
    }
}

impl<R: VmRegion> Default for CpuHeapTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: ver o comentário de módulo — leitura concorrente de ponteiros
// publicados é sã; sincronizar a escrita é responsabilidade do chamador.
unsafe impl<R: VmRegion> Sync for CpuHeapTable<R> {}

#[cfg(feature = "std")]
mod std_cpu_id {
    use super::CpuId;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::cell::Cell as StdCell;
    use std::thread_local;

    static NEXT_ID: AtomicU32 = AtomicU32::new(0);
    thread_local! {
        static THIS_THREAD_ID: StdCell<Option<u32>> = const { StdCell::new(None) };
    }

    /// `CpuId` de conveniência fora de um kernel: atribui um índice
    /// sequencial estável por thread do sistema operacional na primeira
    /// chamada.
    pub struct StdCpuId;

    impl CpuId for StdCpuId {
        fn current() -> u32 {
            THIS_THREAD_ID.with(|cell| {
                if let Some(id) = cell.get() {
                    return id;
                }
                let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
                cell.set(Some(id));
                id
            })
        }
    }
}

#[cfg(feature = "std")]
pub use std_cpu_id::StdCpuId;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{StdRegion, StdVm};

    #[test]
    fn set_and_read_current_heap() {
        let heap = Heap::<StdRegion>::new(StdVm, 4096).unwrap();
        let table: CpuHeapTable<StdRegion> = CpuHeapTable::new();
        unsafe {
            table.set_current(0, &heap);
            assert!(table.current(0).is_some());
            assert!(table.current(1).is_none());
        }
        table.clear_current(0);
        unsafe {
            assert!(table.current(0).is_none());
        }
    }

    #[cfg(feature = "std")]
    #[test]
    fn std_cpu_id_is_stable_per_thread() {
        let a = StdCpuId::current();
        let b = StdCpuId::current();
        assert_eq!(a, b);
    }
}
