//! Platform-level interrupt controller.
//!
//! Routes level-triggered external interrupt sources into the hart's MEIP and SEIP pending
//! bits through two contexts (M-mode and S-mode). The register layout is the conventional
//! SiFive/QEMU one: per-source priorities, pending bits, per-context enables, and a
//! threshold/claim-complete pair per context.

use std::sync::{Arc, Mutex};

use log::trace;

use crate::core::interrupts::{MEIP, SEIP};
use crate::core::IrqHub;
use crate::device::Device;
use crate::AddressRange;

pub const DEFAULT_BASE: u64 = 0xC00_0000;
pub const SIZE: u64 = 0x100_0000;

const PRIORITY_BASE: u64 = 0;
const PENDING_BASE: u64 = 0x1000;
const ENABLE_BASE: u64 = 0x2000;
const ENABLE_PER_HART: u64 = 0x80;
const CONTEXT_BASE: u64 = 0x20_0000;
const CONTEXT_PER_HART: u64 = 0x1000;
const CONTEXT_THRESHOLD: u64 = 0;
const CONTEXT_CLAIM: u64 = 4;

const MAX_SOURCES: usize = 1024;
const PRIO_BITS: u32 = 4;

/// One hart context: the M-mode or S-mode view of the controller.
#[derive(Debug)]
struct Context {
    mmode: bool,
    priority_threshold: u8,
    enable: [u32; MAX_SOURCES / 32],
    pending: [u32; MAX_SOURCES / 32],
    pending_priority: [u8; MAX_SOURCES],
    claimed: [u32; MAX_SOURCES / 32],
}

impl Context {
    fn new(mmode: bool) -> Self {
        Self {
            mmode,
            priority_threshold: 0,
            enable: [0; MAX_SOURCES / 32],
            pending: [0; MAX_SOURCES / 32],
            pending_priority: [0; MAX_SOURCES],
            claimed: [0; MAX_SOURCES / 32],
        }
    }
}

#[derive(Debug)]
struct State {
    priority: [u8; MAX_SOURCES],
    level: [u32; MAX_SOURCES / 32],
    contexts: [Context; 2],
}

/// The interrupt controller device. All MMIO operations and source-level changes hold the
/// internal mutex for their whole duration.
#[derive(Debug)]
pub struct Plic {
    range: AddressRange,
    hub: Arc<IrqHub>,
    num_ids: u32,
    num_ids_word: u32,
    state: Mutex<State>,
}

impl Plic {
    /// Creates a controller for sources `1..=ndev` at the default base address.
    pub fn new(hub: Arc<IrqHub>, ndev: u32) -> Self {
        assert!(((ndev + 1) as usize) <= MAX_SOURCES);
        Self {
            range: AddressRange::from_base_and_size(DEFAULT_BASE, SIZE).unwrap(),
            hub,
            num_ids: ndev + 1,
            num_ids_word: (ndev + 1).div_ceil(32),
            state: Mutex::new(State {
                priority: [0; MAX_SOURCES],
                level: [0; MAX_SOURCES / 32],
                contexts: [Context::new(true), Context::new(false)],
            }),
        }
    }

    /// Latches the level of interrupt source `id` and updates the context wired to it.
    pub fn set_interrupt_level(&self, id: u32, level: bool) {
        if id == 0 || id >= self.num_ids {
            return;
        }
        trace!("PLIC source {id} level {level}");

        let mut state = self.state.lock().unwrap();
        let id_prio = state.priority[id as usize];
        let id_word = (id / 32) as usize;
        let id_mask = 1u32 << (id % 32);

        if level {
            state.level[id_word] |= id_mask;
        } else {
            state.level[id_word] &= !id_mask;
        }

        for i in 0..state.contexts.len() {
            if state.contexts[i].enable[id_word] & id_mask != 0 {
                let ctx = &mut state.contexts[i];
                if level {
                    ctx.pending[id_word] |= id_mask;
                    ctx.pending_priority[id as usize] = id_prio;
                } else {
                    ctx.pending[id_word] &= !id_mask;
                    ctx.pending_priority[id as usize] = 0;
                    ctx.claimed[id_word] &= !id_mask;
                }
                self.context_update(&state.contexts[i]);
                break;
            }
        }
    }

    /// The lowest-id source that is pending, unclaimed, and above the context's threshold;
    /// zero when there is none.
    fn context_best_pending(&self, ctx: &Context) -> u32 {
        for word in 0..self.num_ids_word as usize {
            let candidates = ctx.pending[word] & !ctx.claimed[word];
            if candidates == 0 {
                continue;
            }
            for bit in 0..32 {
                let id = word as u32 * 32 + bit;
                if id == 0 || id >= self.num_ids || candidates & (1 << bit) == 0 {
                    continue;
                }
                if ctx.pending_priority[id as usize] > ctx.priority_threshold {
                    return id;
                }
            }
        }
        0
    }

    /// Recomputes the context's interrupt line and drives MEIP/SEIP accordingly.
    fn context_update(&self, ctx: &Context) {
        let best = self.context_best_pending(ctx);
        let mask = if ctx.mmode { MEIP } else { SEIP };
        self.hub.set_interrupt_pending(mask, best != 0);
    }

    fn context_claim(&self, ctx: &mut Context) -> u32 {
        let best = self.context_best_pending(ctx);
        if best != 0 {
            ctx.claimed[(best / 32) as usize] |= 1 << (best % 32);
        }
        self.context_update(ctx);
        best
    }

    fn read_u32(&self, offset: u64) -> u32 {
        let mut state = self.state.lock().unwrap();
        match offset {
            PRIORITY_BASE..=0xFFF => {
                let id = (offset >> 2) as u32;
                if id > 0 && id < self.num_ids {
                    state.priority[id as usize] as u32
                } else {
                    0
                }
            }
            PENDING_BASE..=0x1FFF => {
                let word = ((offset - PENDING_BASE) >> 2) as usize;
                if word < self.num_ids_word as usize {
                    state.contexts.iter().fold(0, |acc, c| acc | c.pending[word])
                } else {
                    0
                }
            }
            ENABLE_BASE..=0x1F_FFFF => {
                let cntx = ((offset - ENABLE_BASE) / ENABLE_PER_HART) as usize;
                let word = (((offset - ENABLE_BASE) % ENABLE_PER_HART) >> 2) as usize;
                match state.contexts.get(cntx) {
                    Some(ctx) if word < self.num_ids_word as usize => ctx.enable[word],
                    _ => 0,
                }
            }
            CONTEXT_BASE.. => {
                let cntx = ((offset - CONTEXT_BASE) / CONTEXT_PER_HART) as usize;
                if cntx >= state.contexts.len() {
                    return 0;
                }
                match (offset - CONTEXT_BASE) % CONTEXT_PER_HART {
                    CONTEXT_THRESHOLD => state.contexts[cntx].priority_threshold as u32,
                    CONTEXT_CLAIM => self.context_claim(&mut state.contexts[cntx]),
                    _ => 0,
                }
            }
            _ => 0,
        }
    }

    fn write_u32(&self, offset: u64, value: u32) {
        let mut state = self.state.lock().unwrap();
        match offset {
            PRIORITY_BASE..=0xFFF => {
                let id = (offset >> 2) as u32;
                if id > 0 && id < self.num_ids {
                    state.priority[id as usize] = (value & ((1 << PRIO_BITS) - 1)) as u8;
                }
            }
            ENABLE_BASE..=0x1F_FFFF => {
                let cntx = ((offset - ENABLE_BASE) / ENABLE_PER_HART) as usize;
                let word = (((offset - ENABLE_BASE) % ENABLE_PER_HART) >> 2) as usize;
                if cntx >= state.contexts.len() || word >= self.num_ids_word as usize {
                    return;
                }
                // Source 0 does not exist, its enable bit is hardwired clear.
                let new_val = if word == 0 { value & !1 } else { value };
                let level = state.level[word];
                let priority = state.priority;
                let ctx = &mut state.contexts[cntx];
                let old_val = ctx.enable[word];
                ctx.enable[word] = new_val;

                for bit in 0..32 {
                    let id = word as u32 * 32 + bit;
                    let id_mask = 1u32 << bit;
                    if (old_val ^ new_val) & id_mask == 0 || id >= self.num_ids {
                        continue;
                    }
                    if new_val & id_mask != 0 && level & id_mask != 0 {
                        ctx.pending[word] |= id_mask;
                        ctx.pending_priority[id as usize] = priority[id as usize];
                    } else if new_val & id_mask == 0 {
                        ctx.pending[word] &= !id_mask;
                        ctx.pending_priority[id as usize] = 0;
                        ctx.claimed[word] &= !id_mask;
                    }
                }
                self.context_update(&state.contexts[cntx]);
            }
            CONTEXT_BASE.. => {
                let cntx = ((offset - CONTEXT_BASE) / CONTEXT_PER_HART) as usize;
                if cntx >= state.contexts.len() {
                    return;
                }
                match (offset - CONTEXT_BASE) % CONTEXT_PER_HART {
                    CONTEXT_THRESHOLD => {
                        let ctx = &mut state.contexts[cntx];
                        ctx.priority_threshold = (value & ((1 << PRIO_BITS) - 1)) as u8;
                        self.context_update(&state.contexts[cntx]);
                    }
                    CONTEXT_CLAIM => {
                        // Completion: clears the claim, but only for an enabled source.
                        let id = value;
                        if id < self.num_ids {
                            let word = (id / 32) as usize;
                            let mask = 1u32 << (id % 32);
                            let ctx = &mut state.contexts[cntx];
                            if ctx.enable[word] & mask != 0 {
                                ctx.claimed[word] &= !mask;
                                self.context_update(&state.contexts[cntx]);
                            }
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

impl Device for Plic {
    fn name(&self) -> &str {
        "PLIC"
    }

    fn range(&self) -> AddressRange {
        self.range
    }

    fn read(&self, offset: u64, size: usize) -> Option<u64> {
        match size {
            8 => Some(self.read_u32(offset) as u64 | (self.read_u32(offset + 4) as u64) << 32),
            4 => Some(self.read_u32(offset) as u64),
            _ => Some(0),
        }
    }

    fn write(&self, offset: u64, size: usize, value: u64) -> bool {
        match size {
            8 => {
                self.write_u32(offset, value as u32);
                self.write_u32(offset + 4, (value >> 32) as u32);
            }
            4 => self.write_u32(offset, value as u32),
            _ => {}
        }
        true
    }
}

/// A single interrupt source line into the PLIC, handed to a device at construction.
#[derive(Debug, Clone)]
pub struct IrqLine {
    plic: Arc<Plic>,
    id: u32,
}

impl IrqLine {
    pub fn new(plic: Arc<Plic>, id: u32) -> Self {
        Self { plic, id }
    }

    pub fn set_level(&self, level: bool) {
        self.plic.set_interrupt_level(self.id, level);
    }
}
