use anyhow::{bail, Context};
use clap::clap_derive::Parser;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tracing::{info, instrument};

/// Receive granularity; a read shorter than this ends the current cycle.
const RECV_CHUNK: usize = 4096;

/// Prompt appended to execute/upload replies so an interactive peer sees
/// where one reply ends and may type the next line.
pub const ACK_PROMPT: &str = "#> ";

const EXAMPLES: &str = "\
Examples:
  netcat -t 192.168.1.108 -p 5555 -l                       echo listener
  netcat -t 192.168.1.108 -p 5555 -l -u=mytest.txt         receive into a file
  netcat -t 192.168.1.108 -p 5555 -l -e=\"cat /etc/passwd\"  run a command per line
  echo 'ABC' | netcat -t 192.168.1.108 -p 135              send a text on port 135
  netcat -t 192.168.1.108 -p 5555                          connect to a listener
";

#[derive(Parser, Debug)]
#[command(version, about, long_about, after_help = EXAMPLES)]
pub struct NetcatArgs {
    /// Target host to connect to
    #[clap(short, long, default_value = "192.168.1.203")]
    target: String,
    /// TCP port for connect or bind
    #[clap(short, long, default_value_t = 5555)]
    port: u16,
    /// Accept a single inbound connection instead of connecting out
    #[clap(short, long)]
    listen: bool,
    /// Command to run for each received line (listen mode)
    #[clap(short, long)]
    execute: Option<String>,
    /// File to append received bytes to (listen mode)
    #[clap(short, long)]
    upload: Option<String>,
}

#[instrument]
pub async fn run(args: NetcatArgs) -> Result<(), anyhow::Error> {
    if args.listen {
        listen(&args).await?;
    } else {
        // Everything piped in before startup becomes the initial send.
        let mut buffer = Vec::new();
        tokio::io::stdin().read_to_end(&mut buffer).await?;
        connect(&args, buffer).await?;
    }

    Ok(())
}

#[instrument(skip(buffer))]
async fn connect(args: &NetcatArgs, buffer: Vec<u8>) -> Result<(), anyhow::Error> {
    let mut stream = TcpStream::connect((args.target.as_str(), args.port))
        .await
        .with_context(|| format!("connecting to {}:{}", args.target, args.port))?;
    info!(target = %args.target, port = args.port, "connected");

    if !buffer.is_empty() {
        stream.write_all(&buffer).await?;
    }

    tokio::select! {
        res = exchange(&mut stream) => res,
        _ = tokio::signal::ctrl_c() => {
            println!("User terminated.");
            Ok(())
        }
    }
}

/// Lockstep client loop: receive a cycle, show it, send one user line.
/// Prompts even when the peer sent nothing; only an interrupt ends it.
async fn exchange(stream: &mut TcpStream) -> Result<(), anyhow::Error> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    loop {
        let response = recv_cycle(stream).await?;
        if !response.is_empty() {
            let text = String::from_utf8(response).context("peer sent non-text data")?;
            println!("{text}");
        }

        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            bail!("stdin closed while awaiting input");
        }
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        stream.write_all(line.as_bytes()).await?;
    }
}

#[instrument]
async fn listen(args: &NetcatArgs) -> Result<(), anyhow::Error> {
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, "listening");

    let (mut stream, peer) = listener.accept().await?;
    info!(client_address = %peer, "Accepted connection:");

    loop {
        let received = recv_cycle(&mut stream).await?;
        if received.is_empty() {
            info!("peer disconnected");
            break;
        }

        if let Some(command) = args.execute.as_deref() {
            let output = run_command(command).await?;
            stream.write_all(&output).await?;
            stream.write_all(ACK_PROMPT.as_bytes()).await?;
        } else if let Some(path) = args.upload.as_deref() {
            append_upload(path, &received).await?;
            let notice = format!("saved to {path}\n{ACK_PROMPT}");
            stream.write_all(notice.as_bytes()).await?;
        } else {
            stream.write_all(&received).await?;
        }
    }

    Ok(())
}

/// Reads chunks until one comes back short or the peer closes, returning
/// the concatenation. Empty means the peer closed before sending.
async fn recv_cycle<R>(reader: &mut R) -> Result<Vec<u8>, anyhow::Error>
where
    R: AsyncReadExt + Unpin,
{
    let mut data = Vec::new();
    let mut chunk = [0u8; RECV_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        data.extend_from_slice(&chunk[..n]);
        if n < RECV_CHUNK {
            break;
        }
    }
    Ok(data)
}

/// Runs the configured command with a whitespace-split argument vector,
/// no shell in between. Stdout and stderr are captured together.
async fn run_command(command: &str) -> Result<Vec<u8>, anyhow::Error> {
    let mut argv = command.trim().split_whitespace();
    let Some(program) = argv.next() else {
        return Ok(Vec::new());
    };

    let output = Command::new(program)
        .args(argv)
        .output()
        .await
        .with_context(|| format!("failed to run {command:?}"))?;
    if !output.status.success() {
        bail!("{command:?} exited with {}", output.status);
    }

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    Ok(combined)
}

async fn append_upload(path: &str, data: &[u8]) -> Result<(), anyhow::Error> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening upload file {path}"))?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_the_documented_table() {
        let args = NetcatArgs::try_parse_from(["netcat"]).unwrap();
        assert_eq!(args.target, "192.168.1.203");
        assert_eq!(args.port, 5555);
        assert!(!args.listen);
        assert!(args.execute.is_none());
        assert!(args.upload.is_none());
    }

    #[test]
    fn short_flags_cover_every_option() {
        let args = NetcatArgs::try_parse_from([
            "netcat", "-t", "10.0.0.1", "-p", "9000", "-l", "-e", "echo hi", "-u", "out.bin",
        ])
        .unwrap();
        assert_eq!(args.target, "10.0.0.1");
        assert_eq!(args.port, 9000);
        assert!(args.listen);
        assert_eq!(args.execute.as_deref(), Some("echo hi"));
        assert_eq!(args.upload.as_deref(), Some("out.bin"));
    }

    #[test]
    fn malformed_port_is_a_usage_error() {
        assert!(NetcatArgs::try_parse_from(["netcat", "-p", "notaport"]).is_err());
    }

    #[tokio::test]
    async fn run_command_captures_stdout() {
        let out = run_command("echo hello").await.unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn run_command_passes_an_argument_vector_not_a_shell_string() {
        // A shell would treat `;` as a separator; echo must see it literally.
        let out = run_command("echo a;b").await.unwrap();
        assert_eq!(out, b"a;b\n");
    }

    #[tokio::test]
    async fn run_command_errors_on_nonzero_exit() {
        assert!(run_command("false").await.is_err());
    }

    #[tokio::test]
    async fn blank_command_yields_no_output() {
        let out = run_command("   ").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn recv_cycle_stops_at_a_short_read() {
        let (mut client, mut server) = tokio::io::duplex(8192);
        server.write_all(b"hello there").await.unwrap();
        let data = recv_cycle(&mut client).await.unwrap();
        assert_eq!(data, b"hello there");
    }

    #[tokio::test]
    async fn recv_cycle_returns_empty_on_close() {
        let (mut client, server) = tokio::io::duplex(8192);
        drop(server);
        let data = recv_cycle(&mut client).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn recv_cycle_concatenates_across_full_chunks() {
        let (mut client, mut server) = tokio::io::duplex(RECV_CHUNK * 2);
        let payload = vec![0xA5u8; RECV_CHUNK];
        server.write_all(&payload).await.unwrap();
        drop(server);
        let data = recv_cycle(&mut client).await.unwrap();
        assert_eq!(data, payload);
    }
}
