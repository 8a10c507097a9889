use crate::{op, Instruction, Opcode, PanicReason, RegId};

use quickcheck_macros::quickcheck;
use strum::IntoEnumIterator;

/// One representative instruction per opcode, with nontrivial operands.
fn sample_instructions() -> Vec<Instruction> {
    use RegId as R;

    vec![
        op::nop(),
        op::panic(),
        op::trystart(0x1234),
        op::tryend(),
        op::move_(R::A, R::B),
        op::movei(R::C, -1),
        op::moveib(R::D, 0xfe),
        op::load(R::A, R::SP),
        op::loadb(R::B, R::C),
        op::store(R::C, R::D),
        op::storeb(R::D, R::E),
        op::push(R::F),
        op::pop(R::E),
        op::jump(0x77),
        op::cjump(0x20),
        op::call(0x08),
        op::ret(),
        op::syscall(14),
        op::cmp(R::A, R::B),
        op::isequal(),
        op::isless(),
        op::isgreater(),
        op::islessequal(),
        op::isgreaterequal(),
        op::isnotequal(),
        op::fcmp(R::E, R::F),
        op::fisequal(),
        op::fisless(),
        op::fisgreater(),
        op::fislessequal(),
        op::fisgreaterequal(),
        op::fisnotequal(),
        op::inttofloat(R::A),
        op::floattoint(R::B),
        op::add(R::A, R::B),
        op::sub(R::B, R::C),
        op::mul(R::C, R::D),
        op::div(R::D, R::E),
        op::rem(R::E, R::F),
        op::fadd(R::A, R::F),
        op::fsub(R::B, R::E),
        op::fmul(R::C, R::ST),
        op::fdiv(R::D, R::SP),
        op::and(R::A, R::B),
        op::or(R::B, R::C),
        op::xor(R::C, R::D),
        op::not(R::F),
    ]
}

#[test]
fn every_opcode_has_a_sample() {
    let samples = sample_instructions();

    for opcode in Opcode::iter() {
        assert!(
            samples.iter().any(|i| i.opcode() == opcode),
            "no sample instruction for {opcode}",
        );
    }
}

#[test]
fn encode_decode_round_trip() {
    for instruction in sample_instructions() {
        let bytes = instruction.to_bytes();

        assert_eq!(
            bytes.len(),
            instruction.size(),
            "{instruction} encoded to {} bytes, size() says {}",
            bytes.len(),
            instruction.size(),
        );

        let decoded = Instruction::decode(&bytes).expect("decode failed");
        assert_eq!(instruction, decoded);
    }
}

#[test]
fn opcode_sizes_match_wire_format() {
    // The documented per-opcode constants.
    let expected = [
        (Opcode::NOP, 1),
        (Opcode::PANIC, 1),
        (Opcode::TRYSTART, 9),
        (Opcode::TRYEND, 1),
        (Opcode::MOVE, 2),
        (Opcode::MOVEI, 10),
        (Opcode::MOVEIB, 3),
        (Opcode::LOAD, 2),
        (Opcode::LOADB, 2),
        (Opcode::STORE, 2),
        (Opcode::STOREB, 2),
        (Opcode::PUSH, 2),
        (Opcode::POP, 2),
        (Opcode::JUMP, 9),
        (Opcode::CJUMP, 9),
        (Opcode::CALL, 9),
        (Opcode::RET, 1),
        (Opcode::SYSCALL, 2),
        (Opcode::CMP, 2),
        (Opcode::ISEQUAL, 1),
        (Opcode::ISNOTEQUAL, 1),
        (Opcode::FCMP, 2),
        (Opcode::FISGREATEREQUAL, 1),
        (Opcode::INTTOFLOAT, 2),
        (Opcode::FLOATTOINT, 2),
        (Opcode::ADD, 2),
        (Opcode::FDIV, 2),
        (Opcode::AND, 2),
        (Opcode::NOT, 2),
    ];

    for (opcode, size) in expected {
        assert_eq!(opcode.size(), size, "size mismatch for {opcode}");
    }
}

#[test]
fn opcode_byte_values_round_trip() {
    for opcode in Opcode::iter() {
        assert_eq!(Opcode::try_from(opcode as u8), Ok(opcode));
    }
}

#[test]
fn unknown_opcode_byte_is_rejected() {
    for byte in [0x01u8, 0x9f, 0xa9, 0xb4, 0xd9, 0xe3, 0xf5, 0xff] {
        assert_eq!(Opcode::try_from(byte), Err(PanicReason::UnknownOpcode));
        assert_eq!(
            Instruction::decode(&[byte]),
            Err(PanicReason::UnknownOpcode)
        );
    }
}

#[test]
fn reserved_high_nibble_is_rejected() {
    // `push` takes a single register; the high nibble must be zero.
    assert_eq!(
        Instruction::decode(&[Opcode::PUSH as u8, 0x12]),
        Err(PanicReason::InvalidRegister)
    );
}

#[test]
fn register_nibble_out_of_range_is_rejected() {
    assert_eq!(
        Instruction::decode(&[Opcode::ADD as u8, 0x8]),
        Err(PanicReason::InvalidRegister)
    );
    assert_eq!(
        Instruction::decode(&[Opcode::ADD as u8, 0x80]),
        Err(PanicReason::InvalidRegister)
    );
}

#[test]
fn truncated_instructions_are_rejected() {
    for instruction in sample_instructions() {
        let bytes = instruction.to_bytes();

        for len in 1..bytes.len() {
            assert_eq!(
                Instruction::decode(&bytes[..len]),
                Err(PanicReason::TruncatedInstruction),
                "truncation of {instruction} to {len} bytes not detected",
            );
        }
    }
}

#[quickcheck]
fn movei_round_trips_any_word(imm: i64) -> bool {
    let bytes = op::movei(RegId::A, imm).to_bytes();
    Instruction::decode(&bytes) == Ok(Instruction::MoveI(RegId::A, imm))
}

#[quickcheck]
fn jump_round_trips_any_target(target: i64) -> bool {
    let bytes = op::jump(target).to_bytes();
    Instruction::decode(&bytes) == Ok(Instruction::Jump(target))
}

#[quickcheck]
fn moveib_round_trips_any_byte(imm: u8) -> bool {
    let bytes = op::moveib(RegId::F, imm).to_bytes();
    Instruction::decode(&bytes) == Ok(Instruction::MoveIB(RegId::F, imm))
}

#[quickcheck]
fn register_pairs_round_trip(a: u8, b: u8) -> bool {
    let (a, b) = (RegId::new(a % 8), RegId::new(b % 8));
    let bytes = op::cmp(a, b).to_bytes();
    Instruction::decode(&bytes) == Ok(Instruction::Cmp(a, b))
}

#[test]
fn instruction_iterator_walks_boundaries() {
    let bytecode: Vec<u8> = [
        op::movei(RegId::A, 1),
        op::push(RegId::A),
        op::ret(),
    ]
    .into_iter()
    .collect();

    let decoded: Vec<_> = crate::instructions(&bytecode).collect();
    assert_eq!(
        decoded,
        vec![
            (0, Ok(op::movei(RegId::A, 1))),
            (10, Ok(op::push(RegId::A))),
            (12, Ok(op::ret())),
        ]
    );
}

#[test]
fn instruction_iterator_stops_after_malformed_input() {
    let mut bytecode: Vec<u8> = [op::nop()].into_iter().collect();
    bytecode.push(0xff);
    bytecode.push(Opcode::RET as u8);

    let decoded: Vec<_> = crate::instructions(&bytecode).collect();
    assert_eq!(
        decoded,
        vec![(0, Ok(op::nop())), (1, Err(PanicReason::UnknownOpcode))]
    );
}

#[test]
fn display_matches_assembler_syntax() {
    assert_eq!(op::movei(RegId::A, -7).to_string(), "movei a, -7");
    assert_eq!(op::add(RegId::B, RegId::C).to_string(), "add b, c");
    assert_eq!(op::jump(0x40).to_string(), "jump 0x40");
    assert_eq!(op::ret().to_string(), "ret");
    assert_eq!(op::push(RegId::SP).to_string(), "push sp");
}
