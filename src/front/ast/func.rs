use super::{Block, DataType, Decl, Expr, Span};

// FuncFParam ::= "int" IDENT ["[" "]" {"[" ConstExp "]"}];
// 数组形参省略首维，dims 只存省略维之后的各维长度
#[derive(Debug, Clone, PartialEq)]
pub struct FuncFParam {
    pub ty: DataType,
    pub name: String,
    pub is_array: bool,
    pub dims: Vec<Expr>,
    pub span: Span,
}

// FuncDef ::= ("void" | "int") IDENT "(" [FuncFParams] ")" Block;
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDef {
    pub ty: DataType,
    pub name: String,
    pub params: Vec<FuncFParam>,
    pub body: Block,
    pub span: Span,
}

// CompUnit ::= {Decl | FuncDef};
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalItem {
    Decl(Decl),
    FuncDef(FuncDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompUnit {
    pub items: Vec<GlobalItem>,
}
