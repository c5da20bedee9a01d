//! 数组初始化列表的展平。
//!
//! SysY 的花括号初始化允许不完整填充：`{...}` 在非最外层出现时，
//! 它覆盖的元素个数取决于此前已经填入的元素个数——对齐到能整除
//! 已填长度的最长的尾部维度乘积（不含最外维）。展平结果是长度等于
//! 各维乘积的向量，空缺补零。

use crate::front::ast::{ConstInitVal, Expr, InitVal};
use crate::CompilerError;

/// 统一 ConstInitVal / InitVal 两种初始化树的访问方式
pub trait InitItem: Sized {
    fn as_single(&self) -> Option<&Expr>;
    fn as_list(&self) -> Option<&[Self]>;
}

impl InitItem for ConstInitVal {
    fn as_single(&self) -> Option<&Expr> {
        match self {
            ConstInitVal::Single(e) => Some(e),
            ConstInitVal::List(_) => None,
        }
    }

    fn as_list(&self) -> Option<&[Self]> {
        match self {
            ConstInitVal::List(list) => Some(list),
            ConstInitVal::Single(_) => None,
        }
    }
}

impl InitItem for InitVal {
    fn as_single(&self) -> Option<&Expr> {
        match self {
            InitVal::Single(e) => Some(e),
            InitVal::List(_) => None,
        }
    }

    fn as_list(&self) -> Option<&[Self]> {
        match self {
            InitVal::List(list) => Some(list),
            InitVal::Single(_) => None,
        }
    }
}

pub(crate) fn product(dims: &[i32]) -> usize {
    dims.iter().map(|&d| d as usize).product()
}

/// 在 dims 的尾部子维度中选出对齐的那一段：
/// 跳过最外维，从最长的尾部乘积开始，取第一个能整除已填长度的
fn aligned_sub_dims<'a>(filled: usize, dims: &'a [i32]) -> Option<&'a [i32]> {
    for k in 1..dims.len() {
        let sub_size = product(&dims[k..]);
        if filled % sub_size == 0 {
            return Some(&dims[k..]);
        }
    }
    None
}

/// 把嵌套初始化列表展平成长度为 Π dims 的向量；`None` 表示补零的空缺
pub fn flatten_init<'a, T: InitItem>(
    elems: &'a [T],
    dims: &[i32],
) -> Result<Vec<Option<&'a Expr>>, CompilerError> {
    if dims.is_empty() {
        return Err(CompilerError::IRGenerationError(
            "Braces around a scalar initializer are not allowed".to_string(),
        ));
    }
    let total = product(dims);
    let mut flat = Vec::with_capacity(total);
    for elem in elems {
        if flat.len() >= total {
            break;
        }
        if let Some(expr) = elem.as_single() {
            flat.push(Some(expr));
        } else if let Some(list) = elem.as_list() {
            let sub_dims = aligned_sub_dims(flat.len(), dims).ok_or_else(|| {
                CompilerError::IRGenerationError(
                    "Initializer list is not aligned with array dimensions".to_string(),
                )
            })?;
            let mut sub_flat = flatten_init(list, sub_dims)?;
            flat.append(&mut sub_flat);
        }
    }
    while flat.len() < total {
        flat.push(None);
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::ast::Span;

    fn num(n: i32) -> InitVal {
        InitVal::Single(Expr::IntLiteral(n, Span::default()))
    }

    fn list(items: Vec<InitVal>) -> InitVal {
        InitVal::List(items)
    }

    fn values(flat: &[Option<&Expr>]) -> Vec<i32> {
        flat.iter()
            .map(|e| match e {
                Some(Expr::IntLiteral(n, _)) => *n,
                Some(_) => panic!("unexpected expression"),
                None => 0,
            })
            .collect()
    }

    #[test]
    fn full_nested_initializer() {
        let elems = vec![
            list(vec![num(1), num(2), num(3)]),
            list(vec![num(4), num(5), num(6)]),
        ];
        let flat = flatten_init(&elems, &[2, 3]).unwrap();
        assert_eq!(values(&flat), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_list_zero_fills_tail() {
        let elems = vec![num(1), num(2)];
        let flat = flatten_init(&elems, &[5]).unwrap();
        assert_eq!(values(&flat), vec![1, 2, 0, 0, 0]);
    }

    #[test]
    fn braces_align_to_trailing_dims() {
        // dims = 2x3x4: {1,2,3,4, {5},{6}, {7,8}}
        let elems = vec![
            num(1),
            num(2),
            num(3),
            num(4),
            list(vec![num(5)]),
            list(vec![num(6)]),
            list(vec![num(7), num(8)]),
        ];
        let flat = flatten_init(&elems, &[2, 3, 4]).unwrap();
        assert_eq!(
            values(&flat),
            vec![
                1, 2, 3, 4, //
                5, 0, 0, 0, //
                6, 0, 0, 0, //
                7, 8, 0, 0, //
                0, 0, 0, 0, //
                0, 0, 0, 0,
            ]
        );
    }

    #[test]
    fn empty_braces_cover_one_subarray() {
        let elems = vec![list(vec![]), list(vec![num(9)])];
        let flat = flatten_init(&elems, &[2, 2]).unwrap();
        assert_eq!(values(&flat), vec![0, 0, 9, 0]);
    }

    #[test]
    fn scalar_brace_mix_rejects_misalignment() {
        // 一维数组内层再套一层花括号：对齐规则找不到可用的子维度
        let elems = vec![num(1), list(vec![num(2)])];
        assert!(flatten_init(&elems, &[4]).is_err());
    }
}
