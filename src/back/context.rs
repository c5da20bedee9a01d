use koopa::ir::{BasicBlock, FunctionData, Value, ValueKind};
use std::collections::HashMap;

use crate::back::frame::FramePlan;
use crate::back::insts::{Instruction, Reg, ARG_REGS};
use crate::back::program::AsmProgram;
use crate::back::utils::{load_reg_with_offset, store_reg_with_offset};
use crate::CompilerError;

/// 汇编生成上下文。
///
/// `frame` 在进入每个函数时重建；`global_names` 在整个程序期间累积。
/// 固定的暂存寄存器分工：t0 存主操作数/基地址/结果，t1 存第二操作数，
/// t2 存步长常量，t3 留给大偏移寻址和动态下标。
pub struct Context {
    pub program: AsmProgram,
    pub frame: FramePlan,
    /// 全局 alloc 到数据段标号的映射
    pub global_names: HashMap<Value, String>,
    /// 基本块到标号的映射（当前函数内有效）
    pub bb_labels: HashMap<BasicBlock, String>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            program: AsmProgram::new(),
            frame: FramePlan::default(),
            global_names: HashMap::new(),
            bb_labels: HashMap::new(),
        }
    }

    pub fn bb_label(&self, bb: BasicBlock) -> Result<String, CompilerError> {
        self.bb_labels.get(&bb).cloned().ok_or_else(|| {
            CompilerError::CodeGenerationError(format!("Basic block {:?} has no label", bb))
        })
    }

    /// 把一个操作数加载到指定寄存器。
    /// 立即数用 li；函数入参从 a0-a7 或调用方栈帧读取；其余值从自己的溢出槽读取。
    pub fn operand_to_reg(
        &mut self,
        value: Value,
        dest: Reg,
        func: &FunctionData,
    ) -> Result<(), CompilerError> {
        match func.dfg().value(value).kind() {
            ValueKind::Integer(i) => {
                self.program.push(Instruction::Li(dest, i.value()));
                Ok(())
            }
            ValueKind::FuncArgRef(arg) => {
                let idx = arg.index();
                if idx < 8 {
                    self.program.push(Instruction::Mv(dest, ARG_REGS[idx]));
                } else {
                    // 第 9 个起的入参在调用方栈帧里，紧贴本函数栈帧之上
                    let offset = self.frame.size + ((idx - 8) * 4) as i32;
                    load_reg_with_offset(self, dest, offset);
                }
                Ok(())
            }
            _ => {
                let offset = self.frame.offset_of(value)?;
                load_reg_with_offset(self, dest, offset);
                Ok(())
            }
        }
    }

    /// 把一个指针值的地址加载到指定寄存器。
    /// 全局用 la；局部 alloc 是 sp 加偏移；其余（getelemptr/getptr 的结果、
    /// 加载出来的指针形参）从溢出槽读出指针本身。
    pub fn address_to_reg(
        &mut self,
        value: Value,
        dest: Reg,
        func: &FunctionData,
    ) -> Result<(), CompilerError> {
        if let Some(name) = self.global_names.get(&value).cloned() {
            self.program.push(Instruction::La(dest, name));
            return Ok(());
        }
        if matches!(func.dfg().value(value).kind(), ValueKind::Alloc(_)) {
            let offset = self.frame.offset_of(value)?;
            if (-2048..=2047).contains(&offset) {
                self.program.push(Instruction::Addi(dest, Reg::Sp, offset));
            } else {
                self.program.push(Instruction::Li(Reg::T3, offset));
                self.program.push(Instruction::Add(dest, Reg::Sp, Reg::T3));
            }
            return Ok(());
        }
        let offset = self.frame.offset_of(value)?;
        load_reg_with_offset(self, dest, offset);
        Ok(())
    }

    /// 把指令结果写回它的溢出槽
    pub fn store_result(&mut self, inst: Value, src: Reg) -> Result<(), CompilerError> {
        let offset = self.frame.offset_of(inst)?;
        store_reg_with_offset(self, src, offset);
        Ok(())
    }
}
