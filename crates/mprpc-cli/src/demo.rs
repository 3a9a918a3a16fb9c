//! Demo method table served by `mprpc serve` and `mprpc bench --local`.

use mprpc_server::MethodTable;
use rmpv::Value;

/// `sum(x, y)` for integers and `echo(value)`.
pub fn demo_methods() -> MethodTable {
    MethodTable::builder()
        .register_typed("sum", |(x, y): (i64, i64)| {
            x.checked_add(y).ok_or("integer overflow")
        })
        .register("echo", |params| Ok(params.into_iter().next().unwrap_or(Value::Nil)))
        .build()
}
