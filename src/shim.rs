// src/shim.rs

//! Harness generation for cell scripts.
//!
//! The engine does NOT hand user Python to the interpreter as-is.
//! It writes a harness script that embeds the user source and adds the
//! notebook conventions cells rely on.
//!
//! Responsibilities of the Python harness:
//! - Load the parameters object from the input file (missing/invalid => `{}`)
//! - Bind `x` and `y` from the first two series-like upstream inputs. A dict
//!   input contributes its first list under `series`, `values`, `data`, `x`,
//!   `y` (in that order), so an upstream `{x, y}` value binds its `x`.
//! - Promote scalar parameters to top-level names
//! - Capture the value of a trailing bare expression (unless the last line ends in `;`)
//! - Save an open matplotlib figure to the image path
//! - Write the captured value (or `{x, y}`) as JSON to the json path
//! - Print a traceback to STDERR and exit 1 on uncaught exceptions
//!
//! Julia sources are written verbatim. There is no implicit display or value
//! capture for Julia cells.
//!
//! Everything here is pure string building; writing and running the result
//! is the orchestrator's job.

use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::language::Language;

/// Env var carrying the input parameters JSON path.
pub const ENV_INPUT: &str = "FLOWBOARD_INPUT";
/// Env var carrying the image artifact path.
pub const ENV_OUTPUT_IMAGE: &str = "FLOWBOARD_OUTPUT_IMAGE";
/// Env var carrying the structured value artifact path.
pub const ENV_OUTPUT_JSON: &str = "FLOWBOARD_OUTPUT_JSON";

/// Side-channel file locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessPaths {
    pub input: PathBuf,
    pub image: PathBuf,
    pub json: PathBuf,
}

impl HarnessPaths {
    /// Standard layout inside a run workspace.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            input: dir.join("input.json"),
            image: dir.join("output.png"),
            json: dir.join("output.json"),
        }
    }
}

/// Script text to write for a cell of the given language.
pub fn cell_script(language: Language, source: &str, paths: &HarnessPaths) -> String {
    match language {
        Language::Python => python_harness(source, paths),
        Language::Julia => source.to_string(),
    }
}

/// Build the Python harness around `source`.
///
/// Paths are read from the environment first; the values baked in here are
/// only a fallback for running the script by hand.
pub fn python_harness(source: &str, paths: &HarnessPaths) -> String {
    // Source goes in last so text inside it is never treated as a placeholder.
    PYTHON_HARNESS
        .replace("__FB_ENV_INPUT__", &py_str(ENV_INPUT))
        .replace("__FB_ENV_IMAGE__", &py_str(ENV_OUTPUT_IMAGE))
        .replace("__FB_ENV_JSON__", &py_str(ENV_OUTPUT_JSON))
        .replace("__FB_INPUT__", &py_path(&paths.input))
        .replace("__FB_IMAGE__", &py_path(&paths.image))
        .replace("__FB_JSON__", &py_path(&paths.json))
        .replace("__FB_SOURCE__", &py_str(source))
}

/// A JSON string literal is also a valid Python string literal.
fn py_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn py_path(p: &Path) -> String {
    py_str(&p.to_string_lossy())
}

const PYTHON_HARNESS: &str = r#"# Generated by flowboard. Wraps one cell; do not edit.
import ast
import json
import linecache
import os
import sys
import traceback

_FB_SOURCE = __FB_SOURCE__
_FB_INPUT = os.environ.get(__FB_ENV_INPUT__, __FB_INPUT__)
_FB_IMAGE = os.environ.get(__FB_ENV_IMAGE__, __FB_IMAGE__)
_FB_JSON = os.environ.get(__FB_ENV_JSON__, __FB_JSON__)
_FB_FILENAME = "<cell>"
_FB_SERIES_KEYS = ("series", "values", "data", "x", "y")


def _fb_load_params():
    try:
        with open(_FB_INPUT, "r", encoding="utf-8") as f:
            data = json.load(f)
    except Exception:
        return {}
    return data if isinstance(data, dict) else {}


def _fb_series(item):
    if isinstance(item, dict):
        for key in _FB_SERIES_KEYS:
            value = item.get(key)
            if isinstance(value, (list, tuple)):
                return list(value)
        return None
    if isinstance(item, (list, tuple)):
        return list(item)
    return None


def _fb_bind_series(inputs):
    found = []
    for item in inputs:
        series = _fb_series(item)
        if series is not None:
            found.append(series)
            if len(found) == 2:
                break
    found.extend([None] * (2 - len(found)))
    return found[0], found[1]


def _fb_namespace(params):
    inputs = params.get("inputs")
    if not isinstance(inputs, list):
        inputs = []
    x, y = _fb_bind_series(inputs)
    ns = {"__name__": "__main__", "params": params, "inputs": inputs, "x": x, "y": y}
    for key, value in params.items():
        if key == "inputs" or not isinstance(key, str) or not key.isidentifier():
            continue
        if isinstance(value, (bool, int, float, str)):
            ns[key] = value
    return ns


def _fb_suppressed(source):
    lines = [line for line in source.splitlines() if line.strip()]
    return bool(lines) and lines[-1].rstrip().endswith(";")


def _fb_run(source, ns):
    linecache.cache[_FB_FILENAME] = (len(source), None, source.splitlines(True), _FB_FILENAME)
    tree = ast.parse(source, filename=_FB_FILENAME, mode="exec")
    if _fb_suppressed(source) or not tree.body or not isinstance(tree.body[-1], ast.Expr):
        exec(compile(tree, _FB_FILENAME, "exec"), ns)
        return None
    last = tree.body.pop()
    exec(compile(tree, _FB_FILENAME, "exec"), ns)
    return eval(compile(ast.Expression(body=last.value), _FB_FILENAME, "eval"), ns)


def _fb_save_figure():
    plt = sys.modules.get("matplotlib.pyplot")
    if plt is None:
        return
    try:
        if plt.get_fignums():
            plt.gcf().savefig(_FB_IMAGE, bbox_inches="tight")
    except Exception:
        pass


def _fb_jsonable(value):
    if value is None or isinstance(value, (bool, int, float, str)):
        return value
    if isinstance(value, dict):
        return {str(k): _fb_jsonable(v) for k, v in value.items()}
    if isinstance(value, (list, tuple, set)):
        return [_fb_jsonable(v) for v in value]
    np = sys.modules.get("numpy")
    if np is not None and isinstance(value, (np.ndarray, np.generic)):
        return _fb_jsonable(value.tolist())
    pd = sys.modules.get("pandas")
    if pd is not None and isinstance(value, pd.DataFrame):
        return {str(c): _fb_jsonable(value[c].tolist()) for c in value.columns}
    tolist = getattr(value, "tolist", None)
    if callable(tolist):
        try:
            return _fb_jsonable(tolist())
        except Exception:
            pass
    return str(value)


def _fb_write_value(value, ns):
    if value is None:
        x, y = ns.get("x"), ns.get("y")
        if x is None and y is None:
            return
        value = {"x": x, "y": y}
    try:
        payload = json.dumps({"value": _fb_jsonable(value)}, allow_nan=False)
        with open(_FB_JSON, "w", encoding="utf-8") as f:
            f.write(payload)
    except Exception:
        pass


def _fb_report_failure():
    try:
        from rich.console import Console
        from rich.traceback import Traceback

        Console(stderr=True).print(Traceback())
    except Exception:
        traceback.print_exc()
    sys.stderr.flush()
    sys.exit(1)


def _fb_main():
    ns = _fb_namespace(_fb_load_params())
    try:
        value = _fb_run(_FB_SOURCE, ns)
    except SystemExit:
        raise
    except BaseException:
        _fb_report_failure()
        return
    _fb_save_figure()
    _fb_write_value(value, ns)


if __name__ == "__main__":
    _fb_main()
"#;
