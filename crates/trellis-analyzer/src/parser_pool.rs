//! Thread-safe parser pool for tree-sitter parsers
//!
//! Tree-sitter parsers are not Send + Sync, so parsing goes through a small
//! set of dedicated worker threads that each own one parser, fed over a
//! channel. Both blocking and async entry points are provided; the build
//! pipeline fans file analyses out as tokio tasks over the async one.

use std::path::PathBuf;

use anyhow::Result;
use tree_sitter::{Language, Parser};

/// Grammars the analyzer backends parse with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    TypeScript,
    Tsx,
    JavaScript,
}

impl Grammar {
    /// Get the tree-sitter language for this grammar.
    pub fn language(&self) -> Language {
        match self {
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

/// A parsing request sent to the parser pool.
#[derive(Debug)]
pub struct ParseRequest {
    pub grammar: Grammar,
    pub content: String,
    pub path: PathBuf,
}

/// Result of a parsing operation.
#[derive(Debug)]
pub struct ParseResult {
    pub tree: tree_sitter::Tree,
    pub path: PathBuf,
    pub content: String,
}

/// Internal message for the parser worker.
#[derive(Debug)]
struct WorkerRequest {
    request: ParseRequest,
    response_sender: std::sync::mpsc::Sender<Result<ParseResult>>,
}

/// Thread-safe parser pool.
pub struct ParserPool {
    sender: std::sync::mpsc::Sender<WorkerRequest>,
}

impl ParserPool {
    /// Create a new parser pool with the specified number of worker threads.
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = std::sync::mpsc::channel::<WorkerRequest>();
        let receiver = std::sync::Arc::new(std::sync::Mutex::new(receiver));

        for i in 0..num_workers {
            let receiver = receiver.clone();
            std::thread::spawn(move || {
                Self::worker_thread(i, receiver);
            });
        }

        Self { sender }
    }

    /// Worker thread function that processes parsing requests.
    fn worker_thread(
        worker_id: usize,
        receiver: std::sync::Arc<std::sync::Mutex<std::sync::mpsc::Receiver<WorkerRequest>>>,
    ) {
        tracing::debug!("parser worker {} started", worker_id);

        let mut parser = Parser::new();

        loop {
            let next = {
                let guard = match receiver.lock() {
                    Ok(guard) => guard,
                    Err(_) => break,
                };
                guard.recv()
            };
            let WorkerRequest {
                request,
                response_sender,
            } = match next {
                Ok(req) => req,
                Err(_) => {
                    tracing::debug!("parser worker {} shutting down", worker_id);
                    break;
                }
            };

            let language = request.grammar.language();
            if let Err(e) = parser.set_language(&language) {
                let _ = response_sender.send(Err(anyhow::anyhow!("failed to set language: {}", e)));
                continue;
            }

            let result = match parser.parse(&request.content, None) {
                Some(tree) => Ok(ParseResult {
                    tree,
                    path: request.path,
                    content: request.content,
                }),
                None => Err(anyhow::anyhow!("failed to parse content")),
            };

            if response_sender.send(result).is_err() {
                tracing::warn!("failed to send parse result back to caller");
            }
        }
    }

    /// Parse content synchronously. Blocks the current thread until done.
    pub fn parse_blocking(&self, request: ParseRequest) -> Result<ParseResult> {
        let (response_sender, response_receiver) = std::sync::mpsc::channel();

        self.sender
            .send(WorkerRequest {
                request,
                response_sender,
            })
            .map_err(|_| anyhow::anyhow!("parser pool is shut down"))?;

        response_receiver
            .recv()
            .map_err(|_| anyhow::anyhow!("parser worker died"))?
    }

    /// Parse content asynchronously from a tokio context.
    pub async fn parse(&self, request: ParseRequest) -> Result<ParseResult> {
        let sender = self.sender.clone();
        tokio::task::spawn_blocking(move || {
            let (response_sender, response_receiver) = std::sync::mpsc::channel();

            sender
                .send(WorkerRequest {
                    request,
                    response_sender,
                })
                .map_err(|_| anyhow::anyhow!("parser pool is shut down"))?;

            response_receiver
                .recv()
                .map_err(|_| anyhow::anyhow!("parser worker died"))?
        })
        .await
        .map_err(|e| anyhow::anyhow!("task join error: {}", e))?
    }
}

impl Clone for ParserPool {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Convenience function to create a parser pool with default settings.
pub fn create_parser_pool() -> ParserPool {
    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get().max(2))
        .unwrap_or(2);

    ParserPool::new(num_workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_typescript() {
        let pool = create_parser_pool();
        let request = ParseRequest {
            grammar: Grammar::TypeScript,
            content: "const x: number = 1;".to_string(),
            path: PathBuf::from("test.ts"),
        };

        let result = pool.parse(request).await.unwrap();
        assert_eq!(result.tree.root_node().kind(), "program");
    }

    #[test]
    fn test_parse_javascript_blocking() {
        let pool = create_parser_pool();
        let request = ParseRequest {
            grammar: Grammar::JavaScript,
            content: "export const q = gql.default(() => query.A({}));".to_string(),
            path: PathBuf::from("test.js"),
        };

        let result = pool.parse_blocking(request).unwrap();
        assert_eq!(result.tree.root_node().kind(), "program");
        assert!(!result.tree.root_node().has_error());
    }
}
