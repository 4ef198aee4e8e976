//! Table rendering
//!
//! Rows play the part paragraphs play in a body: a row whose first cell opens
//! an `if`, `unless` or `for` is matched to the row holding its `end`, and the
//! rows between are selected or repeated. Marker rows themselves never reach
//! the output. Cells are rendered as ordinary element sequences, so they can
//! hold paragraph-level directives, nested tables and includes.

use std::collections::BTreeSet;

use docfill_ooxml::{Block, Paragraph, Table, TableCell, TableRow};
use tracing::{debug, warn};

use crate::control::LoopHeader;
use crate::directive::{classify, find_matching_end, DirectiveKind, DirectiveMarker};
use crate::error::{Result, TemplateError};
use crate::render::{element_text, RenderContext, Renderer};
use crate::scope::Scope;
use crate::value::MarkerKind;

impl Renderer<'_> {
    /// Render a table, expanding row directives and applying hideRow/hideColumn
    pub(crate) fn render_table(
        &self,
        table: &Table,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
    ) -> Result<Table> {
        let mut hidden_columns = BTreeSet::new();
        let rows = self.render_rows(&table.rows, scope, ctx, &mut hidden_columns)?;

        let mut rendered = Table {
            properties: table.properties.clone(),
            grid: table.grid.clone(),
            rows,
        };
        if !hidden_columns.is_empty() {
            debug!(columns = ?hidden_columns, "hiding table columns");
            remove_columns(&mut rendered, &hidden_columns);
        }
        Ok(rendered)
    }

    fn render_rows(
        &self,
        rows: &[TableRow],
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
        hidden_columns: &mut BTreeSet<usize>,
    ) -> Result<Vec<TableRow>> {
        let texts: Vec<String> = rows
            .iter()
            .map(|row| row.first_paragraph().map(Paragraph::plain_text).unwrap_or_default())
            .collect();
        let markers = rows
            .iter()
            .zip(&texts)
            .enumerate()
            .map(|(i, (row, text))| row_marker(row, text).map_err(|e| e.located(row_location(i))))
            .collect::<Result<Vec<_>>>()?;

        let mut output = Vec::with_capacity(rows.len());
        let mut i = 0;

        while i < rows.len() {
            let marker = &markers[i];
            match marker.kind {
                DirectiveKind::If | DirectiveKind::Unless | DirectiveKind::For => {
                    let matched =
                        find_matching_end(&markers, i).map_err(|e| e.located(row_location(i)))?;
                    let marker_rows = std::iter::once(i)
                        .chain(matched.branches.iter().map(|branch| branch.index))
                        .chain(std::iter::once(matched.end));
                    for index in marker_rows {
                        warn_marker_row(&rows[index], &markers[index], &texts[index]);
                    }

                    if marker.kind == DirectiveKind::For {
                        let header = LoopHeader::parse(&marker.content)?;
                        let items = header.items(scope, self.functions)?;
                        debug!(directive = %marker.describe(), items = items.len(), "repeating rows");

                        for (position, item) in items.into_iter().enumerate() {
                            let iteration = header.bind(scope, position, item);
                            output.extend(self.render_rows(
                                &rows[i + 1..matched.end],
                                &iteration,
                                ctx,
                                hidden_columns,
                            )?);
                        }
                    } else if let Some((start, end)) =
                        self.select_branch(&markers, i, &matched, scope)?
                    {
                        output.extend(self.render_rows(
                            &rows[start + 1..end],
                            scope,
                            ctx,
                            hidden_columns,
                        )?);
                    }
                    i = matched.end + 1;
                }
                DirectiveKind::End | DirectiveKind::Else | DirectiveKind::ElsIf => {
                    return Err(TemplateError::structural(format!(
                        "`{}` without an open row block",
                        marker.describe()
                    ))
                    .located(row_location(i)));
                }
                _ => {
                    if let Some(row) = self.render_row(&rows[i], scope, ctx, hidden_columns)? {
                        output.push(row);
                    }
                    i += 1;
                }
            }
        }

        Ok(output)
    }

    /// Render one regular row; `None` if a cell asked to hide it
    fn render_row(
        &self,
        row: &TableRow,
        scope: &Scope<'_>,
        ctx: &mut RenderContext,
        hidden_columns: &mut BTreeSet<usize>,
    ) -> Result<Option<TableRow>> {
        let mut cells = Vec::with_capacity(row.cells.len());
        let mut hide_row = false;

        for (column, cell) in row.cells.iter().enumerate() {
            let pending = ctx.visibility.len();
            let mut content = self.render_blocks(&cell.content, scope, ctx)?;

            for kind in ctx.visibility.drain(pending..) {
                match kind {
                    MarkerKind::HideRow => hide_row = true,
                    MarkerKind::HideColumn => {
                        hidden_columns.insert(column);
                    }
                    MarkerKind::Image | MarkerKind::Link => {}
                }
            }

            // A cell must end in a paragraph
            if !matches!(content.last(), Some(Block::Paragraph(_))) {
                content.push(Block::Paragraph(Paragraph::default()));
            }
            cells.push(TableCell {
                properties: cell.properties.clone(),
                content,
            });
        }

        if hide_row {
            debug!("hiding table row");
            return Ok(None);
        }
        Ok(Some(TableRow {
            properties: row.properties.clone(),
            cells,
        }))
    }
}

/// Classify a row by its first paragraph. Only the kinds that span rows count;
/// anything else, including a block closed within the first cell, is left for
/// cell rendering.
fn row_marker(row: &TableRow, text: &str) -> Result<DirectiveMarker> {
    let marker = classify(text)?;
    Ok(match marker.kind {
        DirectiveKind::If | DirectiveKind::Unless | DirectiveKind::For
            if closes_in_first_cell(row) =>
        {
            DirectiveMarker::none()
        }
        DirectiveKind::If
        | DirectiveKind::Unless
        | DirectiveKind::For
        | DirectiveKind::ElsIf
        | DirectiveKind::Else
        | DirectiveKind::End => marker,
        DirectiveKind::Include | DirectiveKind::InlineFor | DirectiveKind::None => {
            DirectiveMarker::none()
        }
    })
}

fn closes_in_first_cell(row: &TableRow) -> bool {
    let Some(cell) = row.cells.first() else {
        return false;
    };
    let Some(start) = cell.content.iter().position(|b| b.as_paragraph().is_some()) else {
        return false;
    };
    let markers: Option<Vec<DirectiveMarker>> = cell.content[start..]
        .iter()
        .map(|block| classify(&element_text(block)).ok())
        .collect();
    markers.is_some_and(|markers| find_matching_end(&markers, 0).is_ok())
}

fn row_location(index: usize) -> String {
    format!("table row {}", index + 1)
}

fn warn_marker_row(row: &TableRow, marker: &DirectiveMarker, text: &str) {
    let other_cells = row
        .cells
        .iter()
        .skip(1)
        .any(|cell| !cell.plain_text().trim().is_empty());
    if marker.has_extra_text(text) || other_cells {
        warn!(
            directive = %marker.describe(),
            "ignoring content of directive row"
        );
    }
}

fn remove_columns(table: &mut Table, columns: &BTreeSet<usize>) {
    for row in &mut table.rows {
        for &column in columns.iter().rev() {
            if column < row.cells.len() {
                row.cells.remove(column);
            }
        }
    }
    for &column in columns.iter().rev() {
        if column < table.grid.len() {
            table.grid.remove(column);
        }
    }
}
