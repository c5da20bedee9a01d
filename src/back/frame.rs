//! 栈帧规划。
//!
//! 所有产生值的指令都落在栈上（spill everywhere），一次扫描即可
//! 得到整个函数的布局。从低地址到高地址依次是：
//!
//! ```text
//! +--------------------+  <- sp + size
//! |      ra (可选)      |
//! +--------------------+
//! |      溢出槽 S       |
//! +--------------------+
//! |   出参溢出区 A      |
//! +--------------------+  <- sp
//! ```
//!
//! - S：每条产生值的指令一个槽；alloc 按所指对象的大小计
//! - R：有 call 时为 ra 保留 4 字节，保存在 size - 4 处
//! - A：所有调用点中超出 8 个的实参所需的最大字节数
//! - size = S + R + A 向上对齐到 16 字节

use koopa::ir::{FunctionData, TypeKind, Value, ValueKind};
use std::collections::HashMap;

use crate::CompilerError;

#[derive(Default)]
pub struct FramePlan {
    pub size: i32,
    offsets: HashMap<Value, i32>,
    pub has_call: bool,
    pub arg_area: i32,
}

impl FramePlan {
    /// 指令结果槽（或 alloc 存储区）相对 sp 的最终偏移
    pub fn offset_of(&self, value: Value) -> Result<i32, CompilerError> {
        self.offsets.get(&value).copied().ok_or_else(|| {
            CompilerError::CodeGenerationError(format!(
                "Value {:?} has no frame slot",
                value
            ))
        })
    }

    pub fn has_slot(&self, value: Value) -> bool {
        self.offsets.contains_key(&value)
    }

    pub fn ra_offset(&self) -> i32 {
        self.size - 4
    }
}

/// 扫描函数的所有指令，计算栈帧布局
pub fn plan_frame(func: &FunctionData) -> Result<FramePlan, CompilerError> {
    let mut has_call = false;
    let mut max_call_args = 0usize;
    let mut slots: Vec<(Value, i32)> = Vec::new();

    for (_bb, node) in func.layout().bbs() {
        for &inst in node.insts().keys() {
            let data = func.dfg().value(inst);
            if let ValueKind::Call(call) = data.kind() {
                has_call = true;
                max_call_args = max_call_args.max(call.args().len());
            }
            match data.kind() {
                ValueKind::Alloc(_) => {
                    let size = match data.ty().kind() {
                        TypeKind::Pointer(base) => base.size() as i32,
                        _ => {
                            return Err(CompilerError::CodeGenerationError(format!(
                                "Alloc has non-pointer type: {:?}",
                                data.ty()
                            )));
                        }
                    };
                    slots.push((inst, size));
                }
                _ => {
                    // load / binary / getptr / getelemptr / 有返回值的 call
                    if !data.ty().is_unit() {
                        slots.push((inst, 4));
                    }
                }
            }
        }
    }

    let arg_area = ((max_call_args.saturating_sub(8)) * 4) as i32;
    let mut offsets = HashMap::new();
    let mut cursor = arg_area;
    for (value, size) in slots {
        offsets.insert(value, cursor);
        cursor += size;
    }
    let ra = if has_call { 4 } else { 0 };
    let size = (cursor + ra + 15) & !15;

    Ok(FramePlan {
        size,
        offsets,
        has_call,
        arg_area,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::generate_ir;
    use crate::sysy;
    use koopa::ir::Type;

    fn plan_for_main(src: &str) -> FramePlan {
        Type::set_ptr_size(4);
        let ast = sysy::CompUnitParser::new().parse(src).unwrap();
        let program = generate_ir(&ast, None).unwrap();
        let main = program
            .func_layout()
            .iter()
            .map(|&f| program.func(f))
            .find(|f| f.name() == "@main")
            .unwrap();
        plan_frame(main).unwrap()
    }

    #[test]
    fn leaf_frame_is_aligned_without_ra() {
        let plan = plan_for_main("int main() { int x = 1; return x; }");
        assert_eq!(plan.size % 16, 0);
        assert!(!plan.has_call);
        assert_eq!(plan.arg_area, 0);
        // x 的存储槽加 return 处 load 的结果槽
        assert!(plan.size >= 8);
    }

    #[test]
    fn call_reserves_ra_and_arg_overflow() {
        let plan = plan_for_main(
            "int f(int a, int b, int c, int d, int e, int g, int h, int i, int j, int k) { return a; }\n\
             int main() { return f(1, 2, 3, 4, 5, 6, 7, 8, 9, 10); }",
        );
        assert!(plan.has_call);
        assert_eq!(plan.arg_area, 8);
        assert_eq!(plan.size % 16, 0);
        assert_eq!(plan.ra_offset(), plan.size - 4);
    }

    #[test]
    fn alloc_slots_use_pointee_size() {
        let plan = plan_for_main("int main() { int a[10][10]; a[0][0] = 1; return 0; }");
        assert!(plan.size >= 400);
    }
}
