use compiler::back::generate_asm;
use compiler::front::generate_ir;
use compiler::sysy;
use koopa::ir::Type;

fn asm_text(src: &str) -> String {
    Type::set_ptr_size(4);
    let ast = sysy::CompUnitParser::new()
        .parse(src)
        .expect("parse should succeed");
    let program = generate_ir(&ast, None).expect("IR generation should succeed");
    generate_asm(&program).expect("asm generation should succeed")
}

/// 所有以 sp 为基址的访存偏移（lw/sw/addi）
fn sp_offsets(asm: &str) -> Vec<i32> {
    let mut offsets = Vec::new();
    for line in asm.lines() {
        let line = line.trim();
        if line.starts_with("lw ") || line.starts_with("sw ") {
            if let Some(open) = line.find('(') {
                if line[open..].starts_with("(sp)") {
                    let imm = line[..open].rsplit(' ').next().unwrap();
                    offsets.push(imm.parse().unwrap());
                }
            }
        }
    }
    offsets
}

/// 每个 `addi sp, sp, -N` 里的 N
fn frame_sizes(asm: &str) -> Vec<i32> {
    asm.lines()
        .filter_map(|line| line.trim().strip_prefix("addi sp, sp, -"))
        .map(|n| n.parse().unwrap())
        .collect()
}

#[test]
fn minimal_main_returns_zero() {
    let asm = asm_text("int main() { return 0; }");
    assert!(asm.contains(".text"));
    assert!(asm.contains(".globl main"));
    assert!(asm.contains("main:"));
    assert!(asm.contains("li a0, 0"));
    assert!(asm.contains("ret"));
}

#[test]
fn frame_sizes_are_16_byte_aligned() {
    let asm = asm_text(
        "int f(int x) { return x + 1; }\n\
         int main() { int s = 0; int i = 1; while (i <= 10) { s = s + f(i); i = i + 1; } return s; }",
    );
    let sizes = frame_sizes(&asm);
    assert!(!sizes.is_empty());
    for size in sizes {
        assert_eq!(size % 16, 0, "frame size {} is not 16-byte aligned", size);
    }
}

#[test]
fn ra_is_saved_only_when_calling() {
    let leaf = asm_text("int main() { return 0; }");
    assert!(!leaf.contains("ra"), "leaf function must not touch ra:\n{}", leaf);

    let caller = asm_text("int main() { return getint(); }");
    assert!(caller.contains("sw ra"), "caller must save ra:\n{}", caller);
    assert!(caller.contains("lw ra"), "caller must restore ra:\n{}", caller);
}

#[test]
fn call_abi_uses_arg_regs_then_stack() {
    let asm = asm_text(
        "int f(int a, int b, int c, int d, int e, int g, int h, int i, int j, int k) {\n\
           return a + k;\n\
         }\n\
         int main() { return f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); }",
    );
    for (i, reg) in ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"].iter().enumerate() {
        assert!(
            asm.contains(&format!("li {}, {}", reg, i + 1)),
            "arg {} should be loaded into {}:\n{}",
            i + 1,
            reg,
            asm
        );
    }
    // 第 9、10 个实参落在调用点栈帧底部
    assert!(asm.contains("sw t0, 0(sp)"), "ninth arg at 0(sp):\n{}", asm);
    assert!(asm.contains("sw t0, 4(sp)"), "tenth arg at 4(sp):\n{}", asm);
    assert!(asm.contains("call f_"));
}

#[test]
fn loop_branches_through_labels() {
    let asm = asm_text(
        "int main() { int s = 0; int i = 1; while (i <= 10) { s = s + i; i = i + 1; } return s; }",
    );
    assert!(asm.contains("bnez"));
    assert!(asm.contains("main_bb"));
    assert!(asm.contains("j main"));
}

#[test]
fn literal_condition_becomes_unconditional_jump() {
    let asm = asm_text("int main() { while (1) { break; } return 0; }");
    assert!(!asm.contains("bnez"), "folded condition needs no branch:\n{}", asm);
    assert!(asm.contains("j main_bb"));
}

#[test]
fn global_scalar_load_store() {
    let asm = asm_text("int g = 5;\nint main() { g = g + 1; return g; }");
    assert!(asm.contains(".data"));
    assert!(asm.contains(".word 5"));
    assert!(asm.contains("la "));
}

#[test]
fn zero_global_array_is_one_zero_directive() {
    let asm = asm_text("int z[6];\nint main() { return 0; }");
    assert!(asm.contains(".zero 24"));
}

#[test]
fn trailing_zeros_are_coalesced() {
    let asm = asm_text("int a[8] = {1};\nint main() { return 0; }");
    assert!(asm.contains(".word 1"));
    assert!(asm.contains(".zero 28"));
}

#[test]
fn global_array_element_access() {
    let asm = asm_text(
        "int a[2][3] = {{1, 2, 3}, {4, 5, 6}};\nint main() { return a[1][2]; }",
    );
    assert!(asm.contains(".word 6"));
    assert!(asm.contains("la "));
    // a[1][2] 的偏移都是字面量，折进地址加法
    assert!(asm.contains("addi t0, t0, 12"));
    assert!(asm.contains("addi t0, t0, 8"));
}

#[test]
fn array_parameter_roundtrip() {
    let asm = asm_text(
        "int f(int b[][3]) { return b[1][2]; }\n\
         int a[2][3] = {{1, 2, 3}, {4, 5, 6}};\n\
         int main() { return f(a); }",
    );
    assert!(asm.contains("mv "), "first arg arrives in a0:\n{}", asm);
    assert!(asm.contains("call f_"));
}

#[test]
fn dynamic_index_multiplies_by_stride() {
    let asm = asm_text(
        "int a[4][5];\nint main() { int i = getint(); return a[i][2]; }",
    );
    // 动态下标：li t2, 步长; mul
    assert!(asm.contains("li t2, 20"), "row stride is 20 bytes:\n{}", asm);
    assert!(asm.contains("mul t3, t3, t2"));
}

#[test]
fn large_frames_respect_imm12_limits() {
    let asm = asm_text(
        "int main() { int a[600]; int b[600]; a[599] = 7; b[599] = a[599]; return b[599]; }",
    );
    // 栈帧远超 imm12：序言走 li + sub
    assert!(asm.contains("li t0, "), "large frame must be materialized:\n{}", asm);
    assert!(asm.contains("sub sp, sp, t0"));
    for offset in sp_offsets(&asm) {
        assert!(
            (-2048..=2047).contains(&offset),
            "offset {} exceeds imm12 range",
            offset
        );
    }
    for size in frame_sizes(&asm) {
        assert_eq!(size % 16, 0);
    }
}

#[test]
fn comparison_lowering_uses_slt_family() {
    let asm = asm_text("int main() { int a = getint(); return a <= 3; }");
    assert!(asm.contains("slt "));
    assert!(asm.contains("seqz "));
}
