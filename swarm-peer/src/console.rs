//! Console input: parse stdin lines and hand commands to the client loop.

use swarm_core::command::HELP;
use swarm_core::{parse_line, Command, Input};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Read stdin until EOF or `/quit`. EOF counts as `/quit`.
pub async fn run_console(commands: UnboundedSender<Command>) -> std::io::Result<()> {
    println!("{}", HELP);
    forward_lines(BufReader::new(tokio::io::stdin()), commands).await
}

async fn forward_lines<R: AsyncBufRead + Unpin>(
    reader: R,
    commands: UnboundedSender<Command>,
) -> std::io::Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(Input::Command(cmd)) => {
                let quit = cmd == Command::Quit;
                if commands.send(cmd).is_err() || quit {
                    return Ok(());
                }
            }
            Ok(Input::Help) => println!("{}", HELP),
            Ok(Input::Empty) => {}
            Err(e) => println!("{}. Use /help for the command list.", e),
        }
    }
    debug!("console closed");
    let _ = commands.send(Command::Quit);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::{PeerId, PeerTarget};
    use tokio::sync::mpsc;

    async fn feed(input: &'static str) -> Vec<Command> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_lines(input.as_bytes(), tx).await.unwrap();
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[tokio::test]
    async fn lines_become_commands() {
        let got = feed("/peer 4\n\n/bogus\nhi all\n/help\n/quit\nafter quit\n").await;
        assert_eq!(
            got,
            vec![
                Command::Connect(PeerTarget::Id(PeerId(4))),
                Command::Chat("hi all".into()),
                Command::Quit,
            ]
        );
    }

    #[tokio::test]
    async fn eof_quits() {
        assert_eq!(feed("hello").await, vec![Command::Chat("hello".into()), Command::Quit]);
    }
}
