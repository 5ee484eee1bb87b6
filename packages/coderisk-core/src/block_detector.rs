//! Regex fallback block detector (§4.4 last paragraph).
//!
//! S4 Atomize's primary boundary detection is the LLM; this module exists
//! for two cases the spec calls out explicitly: deciding whether a hunk is
//! even worth sending to the LLM (cheap pre-filter) and recovering block
//! boundaries when the LLM call itself dead-letters. It is intentionally
//! coarse — no real parser, just the three patterns the spec names.

use crate::model::BlockType;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBlock {
    pub name: String,
    pub block_type: BlockType,
    pub start_line: u32,
}

struct Patterns {
    def_class: Regex,
    function_class_arrow: Regex,
    func_type: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // Python: def foo(...): / class Foo:
        def_class: Regex::new(r"^\s*(def|class)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        // JS/TS: function foo(...) / class Foo / const foo = (...) =>
        function_class_arrow: Regex::new(
            r"^\s*(?:export\s+)?(?:default\s+)?(function|class)\s+([A-Za-z_$][A-Za-z0-9_$]*)|^\s*(?:export\s+)?const\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?\([^)]*\)\s*=>",
        )
        .unwrap(),
        // Go/Rust-ish: func foo(...) / type Foo struct
        func_type: Regex::new(r"^\s*(?:pub\s+)?(func|fn|type)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
    })
}

/// Scans a file's lines for block-opening signatures, using whichever
/// pattern family matches first per line. Classification of block_type is
/// a best-effort mapping, not langage-aware parsing: `class` maps to
/// `BlockType::Class`, everything else to `Function` (the spec does not
/// require the fallback to distinguish Method/Component/Enum/Interface).
pub fn detect_blocks(lines: &[&str]) -> Vec<DetectedBlock> {
    let p = patterns();
    let mut out = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = p.def_class.captures(line) {
            let kw = &caps[1];
            out.push(DetectedBlock {
                name: caps[2].to_string(),
                block_type: if kw == "class" { BlockType::Class } else { BlockType::Function },
                start_line: (i + 1) as u32,
            });
            continue;
        }
        if let Some(caps) = p.function_class_arrow.captures(line) {
            if let Some(name) = caps.get(2).or_else(|| caps.get(3)) {
                let is_class = caps.get(1).map(|m| m.as_str() == "class").unwrap_or(false);
                out.push(DetectedBlock {
                    name: name.as_str().to_string(),
                    block_type: if is_class { BlockType::Class } else { BlockType::Function },
                    start_line: (i + 1) as u32,
                });
            }
            continue;
        }
        if let Some(caps) = p.func_type.captures(line) {
            let kw = &caps[1];
            out.push(DetectedBlock {
                name: caps[2].to_string(),
                block_type: if kw == "type" { BlockType::Type } else { BlockType::Function },
                start_line: (i + 1) as u32,
            });
        }
    }

    out
}

/// Cheap pre-filter: is this hunk worth an LLM call at all, or obviously
/// just whitespace/comment churn with no block-opening line in range?
pub fn hunk_likely_touches_block(hunk_lines: &[&str]) -> bool {
    !detect_blocks(hunk_lines).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_python_def_and_class() {
        let lines = ["class Foo:", "    def bar(self):", "        pass"];
        let blocks = detect_blocks(&lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "Foo");
        assert_eq!(blocks[0].block_type, BlockType::Class);
        assert_eq!(blocks[1].name, "bar");
        assert_eq!(blocks[1].block_type, BlockType::Function);
    }

    #[test]
    fn detects_js_function_class_and_arrow_const() {
        let lines = [
            "export function handleClick() {",
            "export class Widget {",
            "const onSubmit = (event) => {",
        ];
        let blocks = detect_blocks(&lines);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].name, "handleClick");
        assert_eq!(blocks[1].name, "Widget");
        assert_eq!(blocks[1].block_type, BlockType::Class);
        assert_eq!(blocks[2].name, "onSubmit");
    }

    #[test]
    fn detects_go_func_and_type() {
        let lines = ["func Process(x int) error {", "type Config struct {"];
        let blocks = detect_blocks(&lines);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "Process");
        assert_eq!(blocks[1].name, "Config");
        assert_eq!(blocks[1].block_type, BlockType::Type);
    }

    #[test]
    fn whitespace_only_hunk_does_not_touch_a_block() {
        let lines = ["", "   ", "// just a comment"];
        assert!(!hunk_likely_touches_block(&lines));
    }
}
