//! HTML templates for the web interface.
//!
//! Embedded HTML for the avatar editor page.

use super::routes::EditorView;
use crate::config::Config;

/// Filters offered in the dropdown (value, label)
const FILTER_CHOICES: &[(&str, &str)] = &[
    ("none", "None"),
    ("grayscale(1)", "Grayscale"),
    ("sepia(1)", "Sepia"),
    ("invert(1)", "Invert"),
    ("saturate(2)", "Saturate"),
];

fn render_filter_options(current: &str) -> String {
    FILTER_CHOICES
        .iter()
        .map(|(value, label)| {
            format!(
                r#"<option value="{value}" {sel}>{label}</option>"#,
                sel = selected_if(*value == current),
            )
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Render the editor page
pub fn render_editor_page(config: &Config, view: &EditorView) -> String {
    let status_html = match (&view.error, &view.message) {
        (Some(err), _) => format!(r#"<div class="alert error">{}</div>"#, html_escape(err)),
        (None, Some(msg)) => format!(r#"<div class="alert">{}</div>"#, html_escape(msg)),
        _ => String::new(),
    };
    let upload_info = if config.has_upload_url() {
        format!("Saved pictures are uploaded to {}", truncate_url(&config.upload_url, 60))
    } else {
        "No upload URL configured; saved pictures are kept for download".to_string()
    };
    let state_json = serde_json::to_string(view)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("</", "<\\/");

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Profile Picture Editor</title>
    <style>
        * {{ box-sizing: border-box; }}
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; }}
        .container {{ max-width: 560px; margin: 0 auto; background: white; padding: 24px; border-radius: 12px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }}
        h1 {{ color: #333; margin-top: 0; font-size: 22px; }}
        .status {{ background: #e3f2fd; padding: 12px; border-radius: 8px; margin-bottom: 16px; font-size: 14px; word-break: break-word; }}
        .alert {{ background: #c8e6c9; padding: 12px; border-radius: 8px; margin-bottom: 16px; color: #2e7d32; }}
        .alert.error {{ background: #ffcdd2; color: #c62828; }}
        #stage {{ width: 100%; display: flex; justify-content: center; background: {background}; border-radius: 8px; overflow: hidden; }}
        #preview {{ display: block; touch-action: none; cursor: grab; user-select: none; }}
        #preview.dragging {{ cursor: grabbing; }}
        label {{ display: block; margin-top: 12px; font-weight: 600; color: #555; font-size: 14px; }}
        input[type=range], select, input[type=text] {{ width: 100%; margin-top: 6px; }}
        input[type=text], select {{ padding: 8px; border: 1px solid #ddd; border-radius: 8px; font-size: 14px; }}
        .toolbar {{ display: flex; gap: 8px; margin-top: 12px; flex-wrap: wrap; }}
        button {{ padding: 10px 14px; border: none; border-radius: 8px; font-size: 14px; cursor: pointer; background: #eceff1; color: #333; }}
        button.primary {{ background: #2196F3; color: white; }}
        button.danger {{ background: #f44336; color: white; }}
        button:disabled {{ opacity: 0.5; cursor: not-allowed; }}
        .hint {{ font-size: 12px; color: #888; margin-top: 6px; }}
        .open {{ margin-top: 24px; border-top: 1px solid #eee; padding-top: 12px; }}
    </style>
</head>
<body>
<div class="container">
    <h1>Profile Picture</h1>
    {status_html}
    <div class="status" id="status">Status: <span id="status-text">{status}</span></div>

    <div id="stage"><img id="preview" alt="" width="{canvas}" height="{canvas}" draggable="false"></div>
    <p class="hint">Drag the picture to position it inside the circle.</p>

    <label>Zoom <span id="zoom-value">{zoom:.0}%</span></label>
    <input type="range" id="zoom" min="{zoom_min}" max="{zoom_max}" step="1" value="{zoom:.0}">

    <div class="toolbar">
        <button data-action="zoom-out">&minus;</button>
        <button data-action="zoom-in">+</button>
        <button data-action="rotate">Rotate 90&deg;</button>
        <button data-action="reset">Reset</button>
        <button data-action="fit">Fit</button>
    </div>

    <label>Brightness <span id="brightness-value">{brightness:.0}%</span></label>
    <input type="range" id="brightness" min="0" max="200" step="1" value="{brightness:.0}">
    <label>Contrast <span id="contrast-value">{contrast:.0}%</span></label>
    <input type="range" id="contrast" min="0" max="200" step="1" value="{contrast:.0}">
    <label>Filter</label>
    <select id="filter">{filter_options}</select>

    <div class="toolbar">
        <button class="primary" id="save">Save</button>
        <button class="danger" id="cancel">Cancel</button>
        <a href="/avatar.jpg" style="align-self:center;font-size:14px;">Last saved picture</a>
    </div>
    <p class="hint">{upload_info}</p>

    <form class="open" method="post" action="/open" enctype="multipart/form-data">
        <label>Open a picture</label>
        <input type="file" name="file" accept="image/*">
        <label>&hellip;or an image URL</label>
        <input type="text" name="reference" placeholder="https://example.com/me.jpg">
        <div class="toolbar"><button type="submit">Open</button></div>
    </form>
</div>

<script>
let state = {state_json};
const img = document.getElementById('preview');
const stage = document.getElementById('stage');
let inFlight = false;
let pendingMove = null;

function post(url, data) {{
    return fetch(url, {{
        method: 'POST',
        headers: {{ 'Content-Type': 'application/x-www-form-urlencoded' }},
        body: new URLSearchParams(data || {{}})
    }}).then(r => r.json()).then(apply);
}}

function apply(view) {{
    state = view;
    document.getElementById('status-text').textContent =
        view.error ? view.status + ' - ' + view.error : (view.message || view.status);
    img.width = view.canvas_size;
    img.height = view.canvas_size;
    document.getElementById('zoom').value = Math.round(view.zoom_percent);
    document.getElementById('zoom-value').textContent = Math.round(view.zoom_percent) + '%';
    document.getElementById('brightness-value').textContent = Math.round(view.brightness) + '%';
    document.getElementById('contrast-value').textContent = Math.round(view.contrast) + '%';
    document.getElementById('save').disabled = !view.can_save;
    img.classList.toggle('dragging', view.dragging);
    if (view.status === 'empty') {{
        img.removeAttribute('src');
    }} else {{
        img.src = '/preview.png?revision=' + view.revision;
    }}
    if (view.status === 'loading') {{
        setTimeout(() => fetch('/state').then(r => r.json()).then(apply), 250);
    }}
}}

function canvasPoint(e) {{
    const rect = img.getBoundingClientRect();
    const k = state.canvas_size / rect.width;
    return {{ x: (e.clientX - rect.left) * k, y: (e.clientY - rect.top) * k }};
}}

function flushMove() {{
    if (inFlight || !pendingMove) return;
    inFlight = true;
    const p = pendingMove;
    pendingMove = null;
    post('/drag/move', p).finally(() => {{ inFlight = false; flushMove(); }});
}}

img.addEventListener('pointerdown', e => {{
    if (!state.can_save) return;
    img.setPointerCapture(e.pointerId);
    post('/drag/start', canvasPoint(e));
}});
img.addEventListener('pointermove', e => {{
    if (!state.dragging) return;
    pendingMove = canvasPoint(e);
    requestAnimationFrame(flushMove);
}});
['pointerup', 'pointercancel'].forEach(name => img.addEventListener(name, () => {{
    pendingMove = null;
    post('/drag/end');
}}));

document.querySelectorAll('[data-action]').forEach(b => b.addEventListener('click', () =>
    fetch('/action/' + b.dataset.action).then(r => r.json()).then(apply)));

document.getElementById('zoom').addEventListener('input', e =>
    post('/zoom', {{ percent: e.target.value }}));

function adjust() {{
    post('/adjust', {{
        brightness: document.getElementById('brightness').value,
        contrast: document.getElementById('contrast').value,
        filter: document.getElementById('filter').value
    }});
}}
['brightness', 'contrast', 'filter'].forEach(id =>
    document.getElementById(id).addEventListener('input', adjust));

document.getElementById('save').addEventListener('click', () => {{
    document.getElementById('save').disabled = true;
    document.getElementById('status-text').textContent = 'Saving...';
    post('/save');
}});
document.getElementById('cancel').addEventListener('click', () => post('/cancel'));

let lastWidth = 0;
new ResizeObserver(entries => {{
    const width = Math.round(entries[0].contentRect.width);
    if (width !== lastWidth) {{
        lastWidth = width;
        post('/resize', {{ width }});
    }}
}}).observe(stage);

apply(state);
</script>
</body>
</html>"##,
        background = html_escape(&config.background),
        status = html_escape(&view.status),
        canvas = view.canvas_size,
        zoom = view.zoom_percent,
        zoom_min = config.zoom_percent_min,
        zoom_max = config.zoom_percent_max,
        brightness = view.brightness,
        contrast = view.contrast,
        filter_options = render_filter_options(&view.filter),
    )
}

/// Render a simple message page
pub fn render_message_page(title: &str, message: &str, back_link: bool) -> String {
    let back_html = if back_link {
        r#"<p><a href="/">← Back to the editor</a></p>"#
    } else {
        ""
    };

    format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="UTF-8"><title>{title}</title>
<style>body{{font-family:sans-serif;padding:20px;}}
.msg{{background:#e3f2fd;padding:20px;border-radius:8px;max-width:500px;}}
a{{color:#2196F3;}}</style></head>
<body><div class="msg"><h2>{title}</h2><p>{message}</p>{back_html}</div></body></html>"#,
        title = html_escape(title),
        message = html_escape(message),
        back_html = back_html,
    )
}

fn selected_if(condition: bool) -> &'static str {
    if condition { "selected" } else { "" }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn truncate_url(url: &str, max_len: usize) -> String {
    let escaped = html_escape(url);
    if escaped.chars().count() <= max_len {
        escaped
    } else {
        let cut: String = escaped.chars().take(max_len).collect();
        format!("{}…", cut)
    }
}
