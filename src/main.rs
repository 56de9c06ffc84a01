//! Lexio 演示入口
//!
//! 初始化日志、加载配置，基于内存语料的 MockCollaborator 创建 OperationCoordinator，
//! 然后在 stdin 上运行逐行交互：普通输入即用户消息，`/` 开头为命令。

use std::sync::Arc;

use anyhow::Context;
use lexio::config::load_config;
use lexio::conversation::MessageId;
use lexio::sources::{SourceFilter, SourceId};
use lexio::{Action, Collaborators, EngineState, MockCollaborator, OperationCoordinator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

const HELP: &str = "\
commands:
  /search <query>      retrieve sources only
  /select [id]         select a source (no id clears the selection)
  /active [id,id,...]  restrict the sources used for follow-ups (no ids = all)
  /sources             list retrieved sources
  /filter [text]       only list sources matching text (no text resets)
  /clear               clear the conversation
  /clear-sources       clear retrieved sources
  /invalidate <id>     drop cached content for a source
  /quit                exit
anything else is sent as a user message";

fn parse_command(line: &str) -> Option<Action> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let id = || (!rest.is_empty()).then(|| SourceId::new(rest));
    match cmd {
        "/search" => Some(Action::SearchSources {
            query: rest.to_string(),
            metadata: None,
        }),
        "/select" => Some(Action::SelectSource(id())),
        "/active" => Some(Action::SetActiveSources((!rest.is_empty()).then(|| {
            rest.split(',')
                .map(|s| SourceId::new(s.trim()))
                .collect()
        }))),
        "/clear" => Some(Action::ClearMessages),
        "/clear-sources" => Some(Action::ClearSources),
        "/invalidate" => id().map(Action::InvalidateSourceContent),
        "/filter" if rest.is_empty() => Some(Action::ResetFilterSources),
        "/filter" => Some(Action::SetFilterSources(SourceFilter::Text(rest.to_string()))),
        _ => None,
    }
}

fn print_sources(state: &EngineState) {
    if state.sources().is_empty() {
        println!("(no sources)");
        return;
    }
    let active = state.active_sources();
    let visible = state.visible_sources();
    if visible.is_empty() {
        println!("(no sources match the filter)");
    }
    for source in &visible {
        let marker = if state.selected_source().map(|s| &s.id) == Some(&source.id) {
            '>'
        } else if active.iter().any(|a| a.id == source.id) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {} [{}] {} ({:?}, relevance {:.2})",
            source.id,
            source.source_type,
            source.title,
            state.source_load_state(&source.id),
            source.relevance.unwrap_or_default()
        );
    }
    if let Some(content) = state.selected_source_content() {
        if let Some(text) = content.data.as_text() {
            println!("--- selected content ---\n{text}");
        }
    }
}

/// 把流式消息转换成增量输出
#[derive(Default)]
struct StreamPrinter {
    /// 正在输出的消息及已输出的字节数
    current: Option<(MessageId, usize)>,
}

impl StreamPrinter {
    fn update(&mut self, state: &EngineState) -> String {
        let mut out = String::new();
        if let Some((id, printed)) = self.current.take() {
            match state.current_stream() {
                Some(message) if message.id == id => {
                    if let Some(delta) = message.content.get(printed..) {
                        out.push_str(delta);
                    }
                    self.current = Some((id, message.content.len().max(printed)));
                    return out;
                }
                _ => {
                    // 提交前的最后几段可能被合并，补齐尾部；失败的消息不会出现在历史中
                    if let Some(committed) = state.messages().iter().rev().find(|m| m.id == id) {
                        if let Some(tail) = committed.content.get(printed..) {
                            out.push_str(tail);
                        }
                    }
                    out.push('\n');
                }
            }
        }
        if let Some(message) = state.current_stream() {
            out.push_str(&message.content);
            self.current = Some((message.id, message.content.len()));
        }
        out
    }
}

async fn render_stream(mut rx: watch::Receiver<EngineState>) {
    let mut printer = StreamPrinter::default();
    let mut stdout = tokio::io::stdout();
    while rx.changed().await.is_ok() {
        let out = printer.update(&rx.borrow_and_update());
        if !out.is_empty() {
            let _ = stdout.write_all(out.as_bytes()).await;
            let _ = stdout.flush().await;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lexio::observability::init();

    let cfg = load_config(std::env::args().nth(1).map(Into::into))
        .context("Failed to load configuration")?;
    tracing::info!(
        name = cfg.app.name.as_deref().unwrap_or("lexio"),
        timeouts = ?cfg.timeout_policy(),
        "configuration loaded"
    );

    let collaborators = Collaborators::from_all(Arc::new(MockCollaborator::default()));
    let coordinator = Arc::new(OperationCoordinator::new(
        collaborators,
        cfg.engine_options(),
    ));
    tokio::spawn(render_stream(coordinator.subscribe()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/sources" {
            print_sources(&coordinator.snapshot());
            continue;
        }

        let action = if line.starts_with('/') {
            match parse_command(line) {
                Some(action) => action,
                None => {
                    println!("{HELP}");
                    continue;
                }
            }
        } else {
            Action::AddUserMessage(line.to_string())
        };
        let show_sources = matches!(
            action,
            Action::SearchSources { .. } | Action::SelectSource(Some(_))
        );

        let result = tokio::select! {
            result = coordinator.submit(action) => result,
            _ = tokio::signal::ctrl_c() => {
                coordinator.shutdown();
                break;
            }
        };
        match result {
            Ok(()) if show_sources => print_sources(&coordinator.snapshot()),
            Ok(()) => {}
            Err(err) => println!("error: {err}"),
        }
    }

    coordinator.shutdown();
    Ok(())
}
