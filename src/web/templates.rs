//! Embedded HTML templates for the gatetally dashboard.
//!
//! Templates are `&str` constants rendered via minijinja. Dark theme, inline
//! CSS, no external assets.

/// Base layout template. All pages extend this.
pub const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{% block title %}gatetally{% endblock %} - LLM Usage</title>
    <style>
        :root {
            --bg-primary: #0f1117;
            --bg-secondary: #1a1d27;
            --bg-tertiary: #242736;
            --border: #2e3245;
            --text-primary: #e1e4ed;
            --text-secondary: #8b8fa3;
            --text-muted: #5f6375;
            --accent: #6366f1;
            --success: #22c55e;
            --warning: #f59e0b;
            --danger: #ef4444;
            --info: #3b82f6;
            --radius: 8px;
        }
        *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }
        a { color: var(--accent); text-decoration: none; }
        .navbar {
            background: var(--bg-secondary);
            border-bottom: 1px solid var(--border);
            padding: 0 1.5rem;
            display: flex;
            align-items: center;
            height: 56px;
        }
        .navbar-brand { font-size: 1.25rem; font-weight: 700; margin-right: 2rem; }
        .navbar-brand span { color: var(--accent); }
        .nav-link { padding: 0.5rem 0.875rem; color: var(--text-secondary); font-size: 0.875rem; }
        .nav-link.active { color: var(--accent); }
        .container { max-width: 1200px; margin: 0 auto; padding: 1.5rem; }
        .page-header { margin-bottom: 1.5rem; }
        .page-header h1 { font-size: 1.5rem; font-weight: 600; }
        .page-header p { color: var(--text-secondary); font-size: 0.875rem; }
        .card {
            background: var(--bg-secondary);
            border: 1px solid var(--border);
            border-radius: var(--radius);
            padding: 1.25rem;
        }
        .card-header {
            font-size: 0.875rem;
            font-weight: 600;
            text-transform: uppercase;
            color: var(--text-secondary);
            margin-bottom: 1rem;
        }
        .card-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(220px, 1fr));
            gap: 1rem;
        }
        .mb-2 { margin-bottom: 1rem; }
        .stat { text-align: center; padding: 0.5rem; }
        .stat-value { font-size: 1.75rem; font-weight: 700; }
        .stat-label { font-size: 0.75rem; color: var(--text-muted); text-transform: uppercase; }
        .success { color: var(--success); }
        .warning { color: var(--warning); }
        .danger { color: var(--danger); }
        .info { color: var(--info); }
        table { width: 100%; border-collapse: collapse; font-size: 0.875rem; }
        th { text-align: left; color: var(--text-muted); font-weight: 500; padding: 0.5rem; }
        td { padding: 0.5rem; border-top: 1px solid var(--border); }
        .mono { font-family: ui-monospace, SFMono-Regular, Menlo, monospace; }
        .text-muted { color: var(--text-muted); }
        .bar { background: var(--accent); height: 0.5rem; border-radius: 4px; }
        textarea, select, input {
            width: 100%;
            background: var(--bg-tertiary);
            color: var(--text-primary);
            border: 1px solid var(--border);
            border-radius: var(--radius);
            padding: 0.5rem;
            font: inherit;
        }
        button {
            background: var(--accent);
            color: #fff;
            border: none;
            border-radius: var(--radius);
            padding: 0.5rem 1.25rem;
            cursor: pointer;
        }
        pre.reply { white-space: pre-wrap; margin-top: 1rem; }
    </style>
</head>
<body>
<nav class="navbar">
    <a class="navbar-brand" href="/ui/dashboard"><span>gatetally</span></a>
    <a class="nav-link{% if page == 'dashboard' %} active{% endif %}" href="/ui/dashboard">Dashboard</a>
    <a class="nav-link{% if page == 'chat' %} active{% endif %}" href="/ui/chat">Chat</a>
    <a class="nav-link" href="/api/usage/export.csv">Export CSV</a>
</nav>
<div class="container">
{% block body %}{% endblock %}
</div>
{% block scripts %}{% endblock %}
</body>
</html>
"#;

/// Analytics dashboard, rendered server-side.
pub const DASHBOARD: &str = r#"{% extends "layout" %}
{% block title %}Dashboard{% endblock %}
{% block body %}
<div class="page-header">
    <h1>Usage Analytics</h1>
    <p>{{ window }}</p>
</div>

<div class="card-grid mb-2">
    <div class="card"><div class="stat">
        <div class="stat-value info" id="stat-requests">{{ summary.total_requests }}</div>
        <div class="stat-label">Requests</div>
    </div></div>
    <div class="card"><div class="stat">
        <div class="stat-value warning" id="stat-cost">{{ total_cost }}</div>
        <div class="stat-label">Total Cost</div>
    </div></div>
    <div class="card"><div class="stat">
        <div class="stat-value" id="stat-tokens">{{ summary.total_tokens }}</div>
        <div class="stat-label">Tokens</div>
    </div></div>
    <div class="card"><div class="stat">
        <div class="stat-value" id="stat-users">{{ summary.unique_users }}</div>
        <div class="stat-label">Unique Users</div>
    </div></div>
    <div class="card"><div class="stat">
        <div class="stat-value success" id="stat-latency">{{ avg_latency }}</div>
        <div class="stat-label">Avg Latency</div>
    </div></div>
    <div class="card"><div class="stat">
        <div class="stat-value danger" id="stat-errors">{{ summary.error_count }}</div>
        <div class="stat-label">Errors</div>
    </div></div>
</div>

<div class="card-grid mb-2">
    <div class="card">
        <div class="card-header">Requests per Model</div>
        <table id="model-table">
            <thead><tr><th>Model</th><th>Requests</th><th>Cost</th><th>p95</th></tr></thead>
            <tbody>
            {% for row in models %}
                <tr><td class="mono">{{ row.label }}</td><td>{{ row.requests }}</td><td>{{ row.cost }}</td><td>{{ row.p95 }}</td></tr>
            {% else %}
                <tr><td colspan="4" class="text-muted">No requests yet</td></tr>
            {% endfor %}
            </tbody>
        </table>
    </div>
    <div class="card">
        <div class="card-header">Requests per Provider</div>
        <table id="provider-table">
            <thead><tr><th>Provider</th><th>Requests</th><th>Cost</th><th>p95</th></tr></thead>
            <tbody>
            {% for row in providers %}
                <tr><td>{{ row.label }}</td><td>{{ row.requests }}</td><td>{{ row.cost }}</td><td>{{ row.p95 }}</td></tr>
            {% else %}
                <tr><td colspan="4" class="text-muted">No requests yet</td></tr>
            {% endfor %}
            </tbody>
        </table>
    </div>
</div>

<div class="card mb-2">
    <div class="card-header">Hourly Activity</div>
    <table id="hourly-table">
        <thead><tr><th>Hour (UTC)</th><th>Requests</th><th>Tokens</th><th>Cost</th><th>Avg Latency</th><th></th></tr></thead>
        <tbody>
        {% for row in hourly %}
            <tr>
                <td class="mono">{{ row.label }}</td><td>{{ row.requests }}</td><td>{{ row.tokens }}</td>
                <td>{{ row.cost }}</td><td>{{ row.avg_latency }}</td>
                <td style="width:30%"><div class="bar" style="width: {{ row.bar_pct }}%"></div></td>
            </tr>
        {% else %}
            <tr><td colspan="6" class="text-muted">No requests yet</td></tr>
        {% endfor %}
        </tbody>
    </table>
</div>

<div class="card">
    <div class="card-header">Top Users</div>
    <table id="users-table">
        <thead><tr><th>User</th><th>Requests</th><th>Cost</th></tr></thead>
        <tbody>
        {% for u in users %}
            <tr><td>{{ u.user }}</td><td>{{ u.requests }}</td><td>{{ u.cost }}</td></tr>
        {% else %}
            <tr><td colspan="3" class="text-muted">No requests yet</td></tr>
        {% endfor %}
        </tbody>
    </table>
</div>
{% endblock %}
"#;

/// Single-prompt chat form. Posts to `/api/chat`.
pub const CHAT: &str = r#"{% extends "layout" %}
{% block title %}Chat{% endblock %}
{% block body %}
<div class="page-header">
    <h1>Chat</h1>
    <p>Send a prompt through the gateway. Every request is recorded.</p>
</div>
<div class="card">
    <form id="chat-form">
        <label for="model">Model</label>
        <select id="model" name="model">
        {% for m in models %}
            <option value="{{ m.id }}">{{ m.name }} ({{ m.provider }})</option>
        {% endfor %}
        </select>
        <label for="prompt">Prompt</label>
        <textarea id="prompt" name="prompt" rows="6"></textarea>
        <p><button type="submit">Send</button></p>
    </form>
    <pre class="reply" id="reply"></pre>
</div>
{% endblock %}
{% block scripts %}
<script>
    document.getElementById('chat-form').addEventListener('submit', async (ev) => {
        ev.preventDefault();
        const reply = document.getElementById('reply');
        reply.textContent = 'Waiting for the model...';
        const body = {
            model: document.getElementById('model').value,
            prompt: document.getElementById('prompt').value,
        };
        try {
            const resp = await fetch('/api/chat', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify(body),
            });
            const data = await resp.json();
            if (data.error) {
                reply.textContent = data.error.message;
            } else {
                reply.textContent = data.response + '\n\n' + data.latency_ms + ' ms, ' +
                    (data.prompt_tokens + data.completion_tokens) + ' tokens, $' + data.cost.toFixed(6);
            }
        } catch (e) {
            reply.textContent = 'Request failed: ' + e;
        }
    });
</script>
{% endblock %}
"#;
