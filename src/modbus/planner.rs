// src/modbus/planner.rs
//
// Range-coalescing planner: groups register descriptors into the minimum
// number of `RegisterCall`s, each readable with a single Modbus request.
// Ported from pkg/mdev/core.go's `AddRegister` and pkg/mdev/registers.go's
// `registerCall`.

use std::sync::Arc;

use super::register::{ModbusRegister, RegisterKind};

/// Maximum quantity of registers a single Modbus read may request
/// (function codes 3/4 cap at 125 per the Modbus spec).
const MAX_CALL_QUANTITY: u16 = 125;

/// A batched read: one Modbus request covering a contiguous (once
/// `process_data` has run) span of registers of the same kind.
pub struct RegisterCall {
    pub kind: RegisterKind,
    pub start: u16,
    pub end: u16,
    pub descriptors: Vec<Arc<ModbusRegister>>,
}

impl RegisterCall {
    pub fn quantity(&self) -> u16 {
        self.end - self.start
    }

    fn seeded_by(desc: Arc<ModbusRegister>) -> Self {
        RegisterCall {
            kind: desc.kind,
            start: desc.register,
            end: desc.end_register(),
            descriptors: vec![desc],
        }
    }

    /// Whether `desc` may be folded into this call: same kind, room left
    /// under the 125-register cap, and its start register either falls
    /// inside the call's current span or touches its end.
    fn accepts(&self, desc: &ModbusRegister) -> bool {
        if self.quantity() >= MAX_CALL_QUANTITY {
            return false;
        }
        if self.kind != desc.kind {
            return false;
        }
        (self.start <= desc.register && self.end >= desc.register) || self.end == desc.register
    }

    fn add(&mut self, desc: Arc<ModbusRegister>) {
        self.descriptors.push(desc);
        self.descriptors.sort_by_key(|r| r.register);

        let new_start = self.descriptors.iter().map(|r| r.register).min().unwrap();
        let new_end = self.descriptors.iter().map(|r| r.end_register()).max().unwrap();
        self.start = self.start.min(new_start);
        self.end = self.end.max(new_end);
    }

    /// Distribute a call response's raw bytes sequentially into each
    /// descriptor in address order, per spec.md §4.1 "Read".
    pub fn distribute(&self, data: &[u8]) {
        let mut pos = 0usize;
        for desc in &self.descriptors {
            let n = desc.byte_count();
            desc.store_raw(data[pos..pos + n].to_vec());
            pos += n;
        }
    }
}

/// Groups descriptors into calls using a first-fit strategy: try each
/// existing call in order, and only open a new one if none accepts the
/// descriptor. This is the same greedy approach as `AddRegister` in
/// core.go, generalised to operate on a whole planner rather than a
/// single `ModbusDevice`.
#[derive(Default)]
pub struct Planner {
    pub calls: Vec<RegisterCall>,
}

impl Planner {
    pub fn new() -> Self {
        Planner { calls: Vec::new() }
    }

    pub fn add_register(&mut self, desc: Arc<ModbusRegister>) {
        for call in &mut self.calls {
            if call.accepts(&desc) {
                call.add(desc);
                return;
            }
        }
        self.calls.push(RegisterCall::seeded_by(desc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::register::Encoding;

    fn u16_reg(tag: &str, register: u16) -> Arc<ModbusRegister> {
        Arc::new(ModbusRegister::new(
            tag,
            tag,
            register,
            Encoding::U16,
            0,
            0,
            RegisterKind::Holding,
        ))
    }

    #[test]
    fn coalesces_contiguous_registers_into_one_call() {
        // Scenario 1 from spec.md §8: addresses 100, 101, 103, all u16
        // holding, factor 0, offset 0 -> one call {holding, 100, 104, 4}.
        let mut planner = Planner::new();
        planner.add_register(u16_reg("a", 100));
        planner.add_register(u16_reg("b", 101));
        planner.add_register(u16_reg("c", 103));

        assert_eq!(planner.calls.len(), 1);
        let call = &planner.calls[0];
        assert_eq!(call.start, 100);
        assert_eq!(call.end, 104);
        assert_eq!(call.quantity(), 4);
        assert_eq!(call.descriptors.len(), 3);

        let data = [0x00, 0x0A, 0x00, 0x0B, 0xFF, 0xFF, 0x00, 0x0C];
        call.distribute(&data);

        assert_eq!(call.descriptors[0].value(), Some(super::super::register::Value::UInt(10)));
        assert_eq!(call.descriptors[1].value(), Some(super::super::register::Value::UInt(11)));
        assert_eq!(call.descriptors[2].value(), Some(super::super::register::Value::UInt(12)));
    }

    #[test]
    fn non_contiguous_far_registers_split_into_separate_calls() {
        let mut planner = Planner::new();
        planner.add_register(u16_reg("a", 0));
        planner.add_register(u16_reg("b", 500));
        assert_eq!(planner.calls.len(), 2);
    }

    #[test]
    fn different_kinds_never_share_a_call() {
        let mut planner = Planner::new();
        planner.add_register(u16_reg("a", 100));
        planner.add_register(Arc::new(ModbusRegister::new(
            "b",
            "b",
            100,
            Encoding::U16,
            0,
            0,
            RegisterKind::Input,
        )));
        assert_eq!(planner.calls.len(), 2);
    }

    #[test]
    fn call_never_exceeds_125_registers() {
        let mut planner = Planner::new();
        for i in 0..130u16 {
            planner.add_register(u16_reg("r", i));
        }
        for call in &planner.calls {
            assert!(call.quantity() <= 125);
        }
        let total: usize = planner.calls.iter().map(|c| c.descriptors.len()).sum();
        assert_eq!(total, 130);
    }
}
