//! # Stable-Index Pool
//!
//! Alocador de índices estáveis sobre um [`crate::vec::Vector`]: `get`
//! devolve um índice livre (reaproveitando um buraco ou crescendo o vetor),
//! `put` devolve esse índice ao conjunto livre. O índice nunca muda
//! enquanto o slot está ocupado — diferente de um `Vec::remove`, que
//! desloca tudo depois dele.
//!
//! Generaliza `pool.h` do core original: o bitmap de slots livres e a pilha
//! de índices livres que lá vivem como um header de vetor embutido
//! (`pool_header_t`) viram aqui dois `Vector`s próprios, mantidos lado a
//! lado com os elementos em vez de um header C compartilhando a mesma
//! alocação — simplificação deliberada (ver DESIGN.md) que troca um
//! ponteiro a menos por uma alocação a mais, sem mudar a interface.
//! O bitmap em si reusa o scan word-parallel de [`crate::bitmap::WordBitmap`]
//! (`trailing_zeros`) para achar o próximo índice ocupado em `next_index`.

use crate::heap::Heap;
use crate::vec::Vector;
use crate::vm::VmRegion;

pub struct Pool<T> {
    elts: Vector<T>,
    free_bitmap: Vector<u64>,
    free_indices: Vector<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self {
            elts: Vector::new(),
            free_bitmap: Vector::new(),
            free_indices: Vector::new(),
        }
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Número de slots alocados, ocupados ou não (equivalente a
    /// `pool_len`/`vec_len` do header original).
    pub fn elts<R: VmRegion>(&self, heap: &Heap<R>) -> usize {
        self.elts.len(heap)
    }

    /// Número de slots atualmente ocupados.
    pub fn len<R: VmRegion>(&self, heap: &Heap<R>) -> usize {
        self.elts.len(heap) - self.free_indices.len(heap)
    }

    fn is_free_bit<R: VmRegion>(&self, heap: &Heap<R>, index: usize) -> bool {
        let word_idx = index / 64;
        let bit = index % 64;
        match self.free_bitmap.get(heap, word_idx) {
            Some(&w) => (w & (1u64 << bit)) != 0,
            None => false,
        }
    }

    fn set_free_bit<R: VmRegion>(&mut self, heap: &mut Heap<R>, index: usize, val: bool) {
        self.ensure_bitmap_capacity(heap, index + 1);
        let bit = index % 64;
        let w = self.free_bitmap.get_mut(heap, index / 64).unwrap();
        if val {
            *w |= 1u64 << bit;
        } else {
            *w &= !(1u64 << bit);
        }
    }

    fn ensure_bitmap_capacity<R: VmRegion>(&mut self, heap: &mut Heap<R>, min_bits: usize) {
        let needed_words = crate::bitmap::words_for_bits(min_bits);
        if self.free_bitmap.len(heap) < needed_words {
            self.free_bitmap.resize(heap, needed_words);
        }
    }

    /// Se `index` está fora dos limites ou é um buraco livre.
    pub fn is_free<R: VmRegion>(&self, heap: &Heap<R>, index: usize) -> bool {
        index >= self.elts.len(heap) || self.is_free_bit(heap, index)
    }

    /// Menor índice ocupado >= `from`, ou `None`. Faz scan word-parallel do
    /// bitmap de livres, igual a [`crate::bitmap::WordBitmap::find_from`].
    pub fn next_index<R: VmRegion>(&self, heap: &Heap<R>, from: usize) -> Option<usize> {
        let len = self.elts.len(heap);
        if from >= len {
            return None;
        }
        let mut word_idx = from / 64;
        let mut mask = !0u64 << (from % 64);
        let total_words = crate::bitmap::words_for_bits(len);
        while word_idx < total_words {
            let word = self.free_bitmap.get(heap, word_idx).copied().unwrap_or(0);
            let occupied = !word & mask;
            if occupied != 0 {
                let idx = word_idx * 64 + occupied.trailing_zeros() as usize;
                return if idx < len { Some(idx) } else { None };
            }
            word_idx += 1;
            mask = !0u64;
        }
        None
    }

    pub fn get_value<'h, R: VmRegion>(&self, heap: &'h Heap<R>, index: usize) -> Option<&'h T> {
        if self.is_free(heap, index) {
            return None;
        }
        self.elts.get(heap, index)
    }

    pub fn get_value_mut<'h, R: VmRegion>(&mut self, heap: &'h Heap<R>, index: usize) -> Option<&'h mut T> {
        if self.is_free(heap, index) {
            return None;
        }
        self.elts.get_mut(heap, index)
    }

    /// Devolve `index` ao conjunto livre, descartando o valor que estava
    /// lá.
    ///
    /// # Panics
    /// Entra em pânico em double-free (`index` já livre) ou índice fora
    /// dos limites.
    pub fn put<R: VmRegion>(&mut self, heap: &mut Heap<R>, index: usize) {
        assert!(index < self.elts.len(heap), "Pool::put: index {index} out of bounds");
        assert!(!self.is_free_bit(heap, index), "Pool::put: double free of index {index}");
        unsafe {
            let ptr = self.elts.get_mut(heap, index).unwrap() as *mut T;
            core::ptr::drop_in_place(ptr);
        }
        self.set_free_bit(heap, index, true);
        self.free_indices.append(heap, index as u32);
    }

    /// Verifica que o bitmap de livres e a pilha de índices livres
    /// concordam entre si. Entra em pânico na primeira divergência.
    pub fn validate<R: VmRegion>(&self, heap: &Heap<R>) {
        let total = self.elts.len(heap);
        let free_len = self.free_indices.len(heap);
        let mut bits_set = 0usize;
        for i in 0..total {
            if self.is_free_bit(heap, i) {
                bits_set += 1;
            }
        }
        for i in 0..free_len {
            let idx = *self.free_indices.get(heap, i).unwrap() as usize;
            assert!(idx < total, "Pool::validate: free index {idx} out of bounds");
            assert!(
                self.is_free_bit(heap, idx),
                "Pool::validate: index {idx} in free_indices but bitmap marks it occupied"
            );
        }
        assert_eq!(
            bits_set, free_len,
            "Pool::validate: free bitmap popcount ({bits_set}) != free_indices length ({free_len})"
        );
    }

    /// Visita `(índice, &T)` de cada slot ocupado, em ordem crescente.
    pub fn foreach<R: VmRegion>(&self, heap: &Heap<R>, mut f: impl FnMut(usize, &T)) {
        let mut i = 0;
        while let Some(idx) = self.next_index(heap, i) {
            f(idx, self.elts.get(heap, idx).unwrap());
            i = idx + 1;
        }
    }

    /// Visita runs contíguos `[start, end)` de índices ocupados, para
    /// processamento em lote sem checar o bitmap elemento a elemento.
    pub fn foreach_region<R: VmRegion>(&self, heap: &Heap<R>, mut f: impl FnMut(usize, usize)) {
        let len = self.elts.len(heap);
        let mut i = 0;
        while i < len {
            match self.next_index(heap, i) {
                Some(start) => {
                    let mut end = start + 1;
                    while end < len && !self.is_free_bit(heap, end) {
                        end += 1;
                    }
                    f(start, end);
                    i = end;
                }
                None => break,
            }
        }
    }

    pub fn iter<'p, 'h, R: VmRegion>(&'p self, heap: &'h Heap<R>) -> Iter<'p, 'h, T, R> {
        Iter { pool: self, heap, next: 0 }
    }

    /// Libera todos os slots ocupados (descartando seus valores) e as
    /// alocações de apoio (bitmap e pilha de índices livres).
    pub fn free<R: VmRegion>(&mut self, heap: &mut Heap<R>) {
        for i in 0..self.elts.len(heap) {
            if !self.is_free_bit(heap, i) {
                unsafe {
                    let ptr = self.elts.get_mut(heap, i).unwrap() as *mut T;
                    core::ptr::drop_in_place(ptr);
                }
            }
        }
        self.elts.free_raw(heap);
        self.free_bitmap.free(heap);
        self.free_indices.free(heap);
    }
}

impl<T: Default> Pool<T> {
    /// Devolve um índice livre (reaproveitando um buraco, se houver)
    /// inicializado com `T::default()`.
    pub fn get<R: VmRegion>(&mut self, heap: &mut Heap<R>) -> usize {
        let free_len = self.free_indices.len(heap);
        if free_len > 0 {
            let index = self.free_indices.delete_at(heap, free_len - 1) as usize;
            self.set_free_bit(heap, index, false);
            *self.elts.get_mut(heap, index).unwrap() = T::default();
            return index;
        }
        let index = self.elts.len(heap);
        self.elts.append(heap, T::default());
        self.ensure_bitmap_capacity(heap, index + 1);
        index
    }
}

/// Iterador produzido por [`Pool::iter`].
pub struct Iter<'p, 'h, T, R: VmRegion> {
    pool: &'p Pool<T>,
    heap: &'h Heap<R>,
    next: usize,
}

impl<'p, 'h, T, R: VmRegion> Iterator for Iter<'p, 'h, T, R> {
    type Item = (usize, &'h T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.pool.next_index(self.heap, self.next)?;
        self.next = idx + 1;
        Some((idx, self.pool.elts.get(self.heap, idx).unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{StdRegion, StdVm};

    fn new_heap(capacity: usize) -> Heap<StdRegion> {
        Heap::new(StdVm, capacity).unwrap()
    }

    #[test]
    fn get_reuses_freed_indices() {
        let mut heap = new_heap(16384);
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.get(&mut heap);
        let b = pool.get(&mut heap);
        let c = pool.get(&mut heap);
        assert_eq!((a, b, c), (0, 1, 2));
        pool.put(&mut heap, b);
        pool.validate(&heap);
        let d = pool.get(&mut heap);
        assert_eq!(d, b, "freed index should be recycled before growing");
        pool.validate(&heap);
    }

    #[test]
    fn iteration_skips_holes() {
        let mut heap = new_heap(16384);
        let mut pool: Pool<u32> = Pool::new();
        for i in 0..10 {
            let idx = pool.get(&mut heap);
            *pool.get_value_mut(&heap, idx).unwrap() = i;
        }
        pool.put(&mut heap, 3);
        pool.put(&mut heap, 7);
        let seen: std::vec::Vec<usize> = pool.iter(&heap).map(|(idx, _)| idx).collect();
        assert_eq!(seen, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        pool.validate(&heap);
    }

    #[test]
    fn churn_keeps_bitmap_and_indices_consistent() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut heap = new_heap(65536);
        let mut pool: Pool<u64> = Pool::new();
        let mut live = std::vec::Vec::new();
        let mut rng = StdRng::seed_from_u64(0x2545F4914F6CDD1D);
        for _ in 0..2000 {
            if live.is_empty() || rng.gen_ratio(2, 3) {
                let idx = pool.get(&mut heap);
                live.push(idx);
            } else {
                let pick = rng.gen_range(0..live.len());
                let idx = live.swap_remove(pick);
                pool.put(&mut heap, idx);
            }
        }
        pool.validate(&heap);
        heap.validate();
    }
}
