use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

/// End-to-end over real sockets: build the tcp_proxy example, stand up
/// a one-shot fake output server, and talk a minimal session through
/// the proxy.
#[test]
fn tcp_proxy_example() {
    println!("Starting the fake output server");
    let sink = TcpListener::bind("127.0.0.1:0").expect("Failed binding sink");
    let sink_addr = sink.local_addr().expect("No sink addr");

    let sink_thread = thread::spawn(move || {
        let (stream, _) = sink.accept().expect("Failed accepting at sink");
        let mut reader = BufReader::new(stream.try_clone().expect("Failed cloning sink stream"));

        let mut stream = stream;
        stream
            .write_all(b"220 sink ready\r\n")
            .expect("Failed writing greeting");

        let mut line = String::new();
        reader.read_line(&mut line).expect("Failed reading at sink");
        assert!(line.starts_with("QUIT"));

        stream
            .write_all(b"221 bye\r\n")
            .expect("Failed writing farewell");
    });

    // Grab a free port for the proxy to listen on.
    let listen_addr = {
        let probe = TcpListener::bind("127.0.0.1:0").expect("Failed probing for a port");
        probe.local_addr().expect("No probe addr").to_string()
    };

    println!("Building and spawning the proxy");
    let proxy = escargot::CargoBuild::new()
        .current_release()
        .current_target()
        .manifest_path("./engine/Cargo.toml")
        .example("tcp_proxy")
        .run()
        .expect("Failed building tcp_proxy example");
    let mut proxy = proxy
        .command()
        .env("SIFT_LISTEN", &listen_addr)
        .env("SIFT_SERVER", sink_addr.to_string())
        .env("SIFT_FILTER", "true")
        .spawn()
        .expect("Failed running tcp_proxy example");

    println!("Connecting through the proxy");
    let mut connection = None;
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(&listen_addr) {
            connection = Some(stream);
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    let mut stream = connection.expect("Failed connecting to the proxy");

    let mut reader = BufReader::new(stream.try_clone().expect("Failed cloning stream"));
    let mut line = String::new();

    reader.read_line(&mut line).expect("Failed reading greeting");
    assert_eq!(line, "220 sink ready\r\n");

    stream.write_all(b"QUIT\r\n").expect("Failed writing QUIT");
    line.clear();
    reader.read_line(&mut line).expect("Failed reading farewell");
    assert_eq!(line, "221 bye\r\n");

    sink_thread.join().expect("Sink thread panicked");

    // shutdown proxy
    proxy.kill().expect("Failed killing proxy process in test");
}
