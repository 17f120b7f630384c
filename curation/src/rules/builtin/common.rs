//! Shared query shapes for the built-in rules.

use crate::core::{QuerySpec, WriteDisposition};
use crate::errors::RuleError;
use crate::rules::sql::{render, table_ref};
use crate::rules::RuleArgs;

const SANDBOX_ROWS: &str = "SELECT * FROM {{source}} WHERE {{predicate}}";

const RETAIN_ROWS: &str = "SELECT * FROM {{source}} WHERE NOT ({{predicate}})";

const COUNT_ROWS: &str = "SELECT COUNT(*) FROM {{source}} WHERE {{predicate}}";

/// Copies the rows matching `predicate` into the sandbox table, then
/// rewrites `table` with the remaining rows.
///
/// `predicate` must be two-valued (never NULL) so that the sandboxed rows
/// and the retained rows partition the table.
pub(crate) fn sandbox_then_retain(
    args: &RuleArgs,
    table: &str,
    sandbox_table: &str,
    predicate: &str,
) -> Result<Vec<QuerySpec>, RuleError> {
    let source = table_ref(&args.project_id, &args.dataset_id, table);

    let sandbox = render(
        "sandbox_rows",
        SANDBOX_ROWS,
        &[("source", source.as_str()), ("predicate", predicate)],
    )?;
    let retain = render(
        "retain_rows",
        RETAIN_ROWS,
        &[("source", source.as_str()), ("predicate", predicate)],
    )?;

    Ok(vec![
        QuerySpec::new(sandbox).with_destination(
            &args.sandbox_dataset_id,
            sandbox_table,
            WriteDisposition::WriteTruncate,
        ),
        QuerySpec::new(retain).with_destination(&args.dataset_id, table, WriteDisposition::WriteTruncate),
    ])
}

/// Copies the rows matching `predicate` into the sandbox table, then
/// rewrites `table` with `rewrite` (a full `SELECT` over the table).
pub(crate) fn sandbox_then_rewrite(
    args: &RuleArgs,
    table: &str,
    sandbox_table: &str,
    predicate: &str,
    rewrite: String,
) -> Result<Vec<QuerySpec>, RuleError> {
    let source = table_ref(&args.project_id, &args.dataset_id, table);
    let sandbox = render(
        "sandbox_rows",
        SANDBOX_ROWS,
        &[("source", source.as_str()), ("predicate", predicate)],
    )?;

    Ok(vec![
        QuerySpec::new(sandbox).with_destination(
            &args.sandbox_dataset_id,
            sandbox_table,
            WriteDisposition::WriteTruncate,
        ),
        QuerySpec::new(rewrite).with_destination(&args.dataset_id, table, WriteDisposition::WriteTruncate),
    ])
}

/// Counts rows of `table` that still match `predicate`.
pub(crate) fn count_matching(args: &RuleArgs, table: &str, predicate: &str) -> Result<String, RuleError> {
    let source = table_ref(&args.project_id, &args.dataset_id, table);
    render("count_rows", COUNT_ROWS, &[("source", source.as_str()), ("predicate", predicate)])
}
