//! Plain-text column tables for the operator console.

const MARGIN: &str = "  ";

/// Render `rows` under `headers`, each column padded to its widest cell.
///
/// ```text
/// ID    ADDRESS
/// ----  --------------
/// abc   127.0.0.1:7070
/// ```
pub fn render<S: AsRef<str>>(headers: &[&str], rows: &[Vec<S>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.as_ref().chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers.iter().copied(), &widths);
    push_row(&mut out, widths.iter().map(|w| "-".repeat(*w)), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(AsRef::as_ref), &widths);
    }
    out
}

fn push_row<I, S>(out: &mut String, cells: I, widths: &[usize])
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for (cell, width) in cells.into_iter().zip(widths) {
        let cell = cell.as_ref();
        out.push_str(cell);
        for _ in cell.chars().count()..*width {
            out.push(' ');
        }
        out.push_str(MARGIN);
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_pad_to_widest_cell() {
        let rows = vec![vec!["a", "127.0.0.1"], vec!["long-id", "x"]];
        let table = render(&["ID", "ADDR"], &rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "ID       ADDR       ");
        assert_eq!(lines[1], "-------  ---------  ");
        assert_eq!(lines[2], "a        127.0.0.1  ");
        assert_eq!(lines[3], "long-id  x          ");
    }

    #[test]
    fn test_headers_only() {
        let rows: Vec<Vec<String>> = Vec::new();
        assert_eq!(render(&["A"], &rows), "A  \n-  \n");
    }
}
