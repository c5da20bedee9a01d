use koopa::ir::builder_traits::*;
use koopa::ir::dfg::DataFlowGraph;
use koopa::ir::layout::Layout;
use koopa::ir::{BasicBlock, Function, Program, Type, Value, ValueKind};

use crate::front::ast::Span;
use crate::front::symbol::SymbolTable;
use crate::utils::SourceMap;
use crate::CompilerError;

/// IR 生成上下文。
///
/// 程序级状态只有一个单调递增的序号 `next_id`，用来给变量、函数
/// 和基本块标签生成不重复的后缀；其余都是当前函数内的状态：
/// 当前基本块、入口块（存放一次性 alloc）和循环栈。
pub struct IrContext {
    pub program: Program,
    pub symbols: SymbolTable,
    pub current_func: Option<Function>,
    pub current_bb: Option<BasicBlock>,
    pub entry_bb: Option<BasicBlock>,
    /// 每层循环的 (continue 目标, break 目标)
    pub loop_stack: Vec<(BasicBlock, BasicBlock)>,
    next_id: u32,
    pub source_map: Option<SourceMap>,
}

impl IrContext {
    pub fn new(source_map: Option<SourceMap>) -> Self {
        Self {
            program: Program::new(),
            symbols: SymbolTable::new(),
            current_func: None,
            current_bb: None,
            entry_bb: None,
            loop_stack: Vec::new(),
            next_id: 0,
            source_map,
        }
    }

    /// 取下一个唯一序号
    pub fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn error_at_span(&self, message: impl Into<String>, span: Span) -> CompilerError {
        let mut msg = message.into();
        if let Some(sm) = &self.source_map {
            msg = format!("{} at {}", msg, sm.format_location(span.begin));
        }
        CompilerError::IRGenerationError(msg)
    }

    pub fn dfg_mut(&mut self) -> Result<&mut DataFlowGraph, CompilerError> {
        let f = self.current_func.ok_or_else(|| {
            CompilerError::IRGenerationError("No current function".to_string())
        })?;
        Ok(self.program.func_mut(f).dfg_mut())
    }

    pub fn layout_mut(&mut self) -> Result<&mut Layout, CompilerError> {
        let f = self.current_func.ok_or_else(|| {
            CompilerError::IRGenerationError("No current function".to_string())
        })?;
        Ok(self.program.func_mut(f).layout_mut())
    }

    pub fn get_current_bb(&self) -> Result<BasicBlock, CompilerError> {
        self.current_bb.ok_or_else(|| {
            CompilerError::IRGenerationError("No current basic block".to_string())
        })
    }

    pub fn set_current_bb(&mut self, bb: BasicBlock) {
        self.current_bb = Some(bb);
    }

    /// 新建基本块并追加到函数布局末尾
    pub fn new_bb(&mut self, name: String) -> Result<BasicBlock, CompilerError> {
        let bb = self.dfg_mut()?.new_bb().basic_block(Some(name));
        self.layout_mut()?
            .bbs_mut()
            .push_key_back(bb)
            .map_err(|_| {
                CompilerError::IRGenerationError("Failed to add basic block".to_string())
            })?;
        Ok(bb)
    }

    /// 当前基本块是否已经以终结指令收尾。
    /// 为真时后续语句都是死代码，不再生成任何 IR。
    pub fn is_terminated(&mut self) -> Result<bool, CompilerError> {
        let bb = self.get_current_bb()?;
        let last_inst = self.layout_mut()?.bb_mut(bb).insts().keys().last().copied();
        if let Some(inst) = last_inst {
            let kind_is_term = matches!(
                self.dfg_mut()?.value(inst).kind(),
                ValueKind::Return(_) | ValueKind::Jump(_) | ValueKind::Branch(_)
            );
            Ok(kind_is_term)
        } else {
            Ok(false)
        }
    }

    /// 把指令追加到当前基本块
    pub fn push_inst(&mut self, inst: Value) -> Result<(), CompilerError> {
        let bb = self.get_current_bb()?;
        self.layout_mut()?
            .bb_mut(bb)
            .insts_mut()
            .push_key_back(inst)
            .map_err(|_| {
                CompilerError::IRGenerationError("Failed to insert instruction".to_string())
            })
    }

    /// 在函数入口块最前插入 alloc，避免循环体内反复分配
    pub fn alloc_in_entry(&mut self, ty: Type) -> Result<Value, CompilerError> {
        let entry_bb = self.entry_bb.ok_or_else(|| {
            CompilerError::IRGenerationError("No entry block for current function".to_string())
        })?;
        let alloc_inst = self.dfg_mut()?.new_value().alloc(ty);
        self.layout_mut()?
            .bb_mut(entry_bb)
            .insts_mut()
            .push_key_front(alloc_inst)
            .map_err(|_| {
                CompilerError::IRGenerationError(
                    "Failed to insert alloc into entry block".to_string(),
                )
            })?;
        Ok(alloc_inst)
    }
}
