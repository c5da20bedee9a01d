pub mod front;
pub mod back;
pub mod utils;

pub use utils::CompilerError;

use lalrpop_util::lalrpop_mod;

// 引用 lalrpop 生成的解析器（由 src/sysy.lalrpop 生成）
lalrpop_mod!(pub sysy);
