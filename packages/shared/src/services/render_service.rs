use async_trait::async_trait;

/// Squares of the most recent move, algebraic ("e2", "e4"), for highlighting.
#[derive(Debug, Clone)]
pub struct MoveHighlight {
    pub from: String,
    pub to: String,
}

/// Everything the renderer needs for one board image. `flip` draws the board
/// from black's side so each viewer sees their own pieces at the bottom.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub fen: String,
    pub flip: bool,
    pub header: String,
    pub turn_label: String,
    pub highlight: Option<MoveHighlight>,
}

#[derive(Debug)]
pub enum RenderError {
    InvalidPosition(String),
    Failed(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::InvalidPosition(msg) => write!(f, "invalid position: {}", msg),
            RenderError::Failed(msg) => write!(f, "render failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

/// Board image producer consumed by the broadcast path. Implementations may
/// do I/O (font or glyph setup), hence the async seam.
#[async_trait]
pub trait BoardRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError>;
}

const SQUARE: i32 = 64;
const MARGIN: i32 = 28;
const HUD: i32 = 56;
const LIGHT: &str = "#f0d9b5";
const DARK: &str = "#b58863";
const HIGHLIGHT: &str = "#f7ec74";

/// Vector board renderer. Produces a self-contained SVG document; raster
/// output stays behind the `BoardRenderer` seam.
#[derive(Clone, Default)]
pub struct SvgBoardRenderer;

impl SvgBoardRenderer {
    pub fn new() -> Self {
        SvgBoardRenderer
    }
}

#[async_trait]
impl BoardRenderer for SvgBoardRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let grid = parse_placement(&request.fen)?;
        let width = SQUARE * 8 + MARGIN * 2;
        let height = SQUARE * 8 + MARGIN * 2 + HUD;

        let highlighted: Vec<(usize, usize)> = request
            .highlight
            .iter()
            .flat_map(|h| [h.from.as_str(), h.to.as_str()])
            .filter_map(square_to_coords)
            .collect();

        let mut svg = String::with_capacity(16 * 1024);
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">",
            w = width,
            h = height
        ));
        svg.push_str(&format!(
            "<rect width=\"{}\" height=\"{}\" fill=\"#2e2a24\"/>",
            width, height
        ));
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"24\" fill=\"#f5f1e8\" font-size=\"18\" font-family=\"sans-serif\">{}</text>",
            MARGIN,
            escape_text(&request.header)
        ));
        svg.push_str(&format!(
            "<text x=\"{}\" y=\"44\" fill=\"#c9c1b2\" font-size=\"14\" font-family=\"sans-serif\">{}</text>",
            MARGIN,
            escape_text(&request.turn_label)
        ));

        for row in 0..8usize {
            for col in 0..8usize {
                // `grid` is rank 8 first; flipping mirrors both axes.
                let (file, rank) = if request.flip {
                    (7 - col, row)
                } else {
                    (col, 7 - row)
                };
                let x = MARGIN + col as i32 * SQUARE;
                let y = HUD + MARGIN + row as i32 * SQUARE;
                let fill = if highlighted.contains(&(file, rank)) {
                    HIGHLIGHT
                } else if (file + rank) % 2 == 1 {
                    LIGHT
                } else {
                    DARK
                };
                svg.push_str(&format!(
                    "<rect x=\"{}\" y=\"{}\" width=\"{s}\" height=\"{s}\" fill=\"{}\"/>",
                    x,
                    y,
                    fill,
                    s = SQUARE
                ));
                if let Some(glyph) = grid[7 - rank][file] {
                    svg.push_str(&format!(
                        "<text x=\"{}\" y=\"{}\" font-size=\"46\" text-anchor=\"middle\">{}</text>",
                        x + SQUARE / 2,
                        y + SQUARE - 16,
                        glyph
                    ));
                }
            }
        }

        // File/rank legends along the bottom and left edges.
        for i in 0..8usize {
            let file_idx = if request.flip { 7 - i } else { i };
            let rank_idx = if request.flip { i } else { 7 - i };
            svg.push_str(&format!(
                "<text x=\"{}\" y=\"{}\" fill=\"#c9c1b2\" font-size=\"13\" text-anchor=\"middle\" font-family=\"sans-serif\">{}</text>",
                MARGIN + i as i32 * SQUARE + SQUARE / 2,
                HUD + MARGIN + SQUARE * 8 + 18,
                (b'a' + file_idx as u8) as char
            ));
            svg.push_str(&format!(
                "<text x=\"{}\" y=\"{}\" fill=\"#c9c1b2\" font-size=\"13\" text-anchor=\"middle\" font-family=\"sans-serif\">{}</text>",
                MARGIN / 2,
                HUD + MARGIN + i as i32 * SQUARE + SQUARE / 2 + 5,
                (b'1' + rank_idx as u8) as char
            ));
        }
        svg.push_str("</svg>");
        Ok(svg.into_bytes())
    }
}

/// Piece placement from the first FEN field, rank 8 first.
fn parse_placement(fen: &str) -> Result<[[Option<char>; 8]; 8], RenderError> {
    let placement = fen
        .split_whitespace()
        .next()
        .ok_or_else(|| RenderError::InvalidPosition("empty fen".to_string()))?;
    let mut grid = [[None; 8]; 8];
    let ranks: Vec<&str> = placement.split('/').collect();
    if ranks.len() != 8 {
        return Err(RenderError::InvalidPosition(format!(
            "expected 8 ranks, got {}",
            ranks.len()
        )));
    }
    for (r, rank) in ranks.iter().enumerate() {
        let mut file = 0usize;
        for c in rank.chars() {
            if let Some(skip) = c.to_digit(10) {
                file += skip as usize;
                continue;
            }
            if file >= 8 {
                return Err(RenderError::InvalidPosition(format!("rank overflow: {}", rank)));
            }
            grid[r][file] = Some(piece_glyph(c).ok_or_else(|| {
                RenderError::InvalidPosition(format!("unknown piece: {}", c))
            })?);
            file += 1;
        }
        if file != 8 {
            return Err(RenderError::InvalidPosition(format!("short rank: {}", rank)));
        }
    }
    Ok(grid)
}

fn piece_glyph(c: char) -> Option<char> {
    Some(match c {
        'K' => '♔',
        'Q' => '♕',
        'R' => '♖',
        'B' => '♗',
        'N' => '♘',
        'P' => '♙',
        'k' => '♚',
        'q' => '♛',
        'r' => '♜',
        'b' => '♝',
        'n' => '♞',
        'p' => '♟',
        _ => return None,
    })
}

fn square_to_coords(square: &str) -> Option<(usize, usize)> {
    let mut chars = square.trim().chars();
    let file = chars.next()?;
    let rank = chars.next()?;
    if !('a'..='h').contains(&file) || !('1'..='8').contains(&rank) {
        return None;
    }
    Some((file as usize - 'a' as usize, rank as usize - '1' as usize))
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
