#![no_main]

use libfuzzer_sys::fuzz_target;
use ral_core::{
    field_mask, parse_address, AccessPath, AccessPolicy, Block, Field, PredictKind, Register,
    ResetKind, ACCESS_POLICY_COUNT,
};

const PATHS: [AccessPath; 3] = [AccessPath::FrontDoor, AccessPath::BackDoor, AccessPath::Predict];
const KINDS: [PredictKind; 3] = [PredictKind::Write, PredictKind::Read, PredictKind::Direct];

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_address(text);
        let _ = text.parse::<AccessPolicy>();
    }

    let width = u32::from(data[0] % 64) + 1;
    let mut block = Block::new("fuzz");
    let Ok(reg) = Register::new("R", width) else {
        return;
    };
    let Ok(reg) = reg
        .with_error_injection(data[1] & 1 != 0, data[1] & 2 != 0)
        .configure(&mut block, 0, "r", |reg| {
            for chunk in data[2..].chunks(3).take(16) {
                let policy = chunk[0];
                let size = chunk.get(1).copied().unwrap_or(1);
                let lsb = chunk.get(2).copied().unwrap_or(0);
                let policy = AccessPolicy::ALL[usize::from(policy) % ACCESS_POLICY_COUNT];
                let size = u32::from(size % 64) + 1;
                let reset = u64::from(lsb) & field_mask(size);
                let position = u32::from(lsb % 64);
                if let Ok(field) =
                    Field::configured(format!("F{lsb}"), size, position, policy, false, reset)
                {
                    reg.add_field(field);
                }
            }
        })
    else {
        return;
    };

    for (step, byte) in data.iter().enumerate() {
        let value = u64::from(*byte).rotate_left(step as u32 * 7);
        let kind = KINDS[usize::from(*byte) % KINDS.len()];
        let path = PATHS[step % PATHS.len()];
        let _ = reg.do_predict(value, kind, path, u64::from(*byte));
        assert_eq!(reg.get_mirrored_value() & !field_mask(width), 0);
    }

    reg.reset(ResetKind::Soft);
    let once = reg.get_mirrored_value();
    reg.reset(ResetKind::Hard);
    assert_eq!(reg.get_mirrored_value(), once);
});
