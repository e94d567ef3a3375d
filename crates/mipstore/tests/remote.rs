//! Wire-protocol clients against a canned local HTTP endpoint.

mod common;

use common::{box_2d, dataset_16};
use mipstore::{
    begin_box_query, begin_tiled_box_query, execute_block_query, execute_box_query_on_server,
    execute_tiled_box_query, create_tile_access, Aborted, Array, BlockQuery, BoxQuery, Codec,
    DType, DTypeAtom, Mode, NetworkAccess, PointN, TiledConfig, TiledDataset,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

type CannedResponse = (Vec<(&'static str, String)>, Vec<u8>);

/// Serves one canned response per expected request, then exits.
async fn serve(listener: TcpListener, responses: Vec<CannedResponse>) {
    for (headers, body) in responses {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }

        let mut response = format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n",
            body.len()
        );
        for (name, value) in &headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("\r\n");
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.flush().await.unwrap();
    }
}

async fn spawn_server(responses: Vec<CannedResponse>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, responses));
    format!("http://{addr}/mod_visus")
}

#[tokio::test]
async fn test_network_block_read() {
    let dataset = dataset_16("remote", 4);
    let url = spawn_server(vec![(
        vec![
            ("visus-dtype", "uint8".to_owned()),
            ("visus-nsamples", "4 4".to_owned()),
            ("visus-compression", "raw".to_owned()),
            ("visus-layout", "hzorder".to_owned()),
        ],
        vec![9u8; 16],
    )])
    .await;

    let access: Arc<dyn mipstore::BlockAccess> = Arc::new(
        NetworkAccess::new(&dataset, &url, None, 1, Some("raw".to_owned())).unwrap(),
    );
    let query = BlockQuery::new(
        &dataset,
        dataset.field("v").unwrap(),
        0.0,
        2,
        Mode::Read,
        Aborted::new(),
    );
    let done = execute_block_query(&access, query).join().await;
    assert!(done.ok(), "{:?}", done.status());
    let buffer = done.buffer.unwrap();
    assert_eq!(buffer.nsamples(), 16);
    assert!(buffer.as_bytes().iter().all(|&b| b == 9));
}

#[tokio::test]
async fn test_network_block_corrupt_shape_is_demoted() {
    let dataset = dataset_16("corrupt", 4);
    let url = spawn_server(vec![(
        vec![
            ("visus-dtype", "uint8".to_owned()),
            ("visus-nsamples", "2 2".to_owned()),
            ("visus-compression", "raw".to_owned()),
            ("visus-layout", "hzorder".to_owned()),
        ],
        vec![9u8; 4],
    )])
    .await;

    let access: Arc<dyn mipstore::BlockAccess> = Arc::new(
        NetworkAccess::new(&dataset, &url, None, 1, Some("raw".to_owned())).unwrap(),
    );
    let query = BlockQuery::new(
        &dataset,
        dataset.field("v").unwrap(),
        0.0,
        2,
        Mode::Read,
        Aborted::new(),
    );
    let done = execute_block_query(&access, query).join().await;
    assert!(!done.ok());
    assert!(done.buffer.is_none());
}

#[tokio::test]
async fn test_remote_box_query_fills_the_buffer() {
    let dataset = dataset_16("remote-box", 4);
    let maxh = dataset.max_resolution();
    let url = spawn_server(vec![(
        vec![
            ("visus-dtype", "uint8".to_owned()),
            ("visus-nsamples", "8 8".to_owned()),
            ("visus-compression", "raw".to_owned()),
            ("visus-layout", String::new()),
        ],
        vec![5u8; 64],
    )])
    .await;

    let mut query = BoxQuery::new(
        box_2d([0, 0], [8, 8]),
        dataset.field("v").unwrap(),
        0.0,
        Mode::Read,
        Aborted::new(),
    )
    .with_end_resolutions(vec![maxh]);
    begin_box_query(&dataset, &mut query).unwrap();

    execute_box_query_on_server(&dataset, &url, None, &mut query)
        .await
        .unwrap();
    assert_eq!(query.current_resolution(), maxh);
    let buffer = query.buffer.as_ref().unwrap();
    assert_eq!(buffer.dims(), PointN::xy(8, 8));
    assert!(buffer.as_bytes().iter().all(|&b| b == 5));
}

#[tokio::test]
async fn test_tiled_read_assembles_a_tile() {
    // 8x8 tiled pyramid of 4x4 png tiles.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let tile = Array::filled(PointN::xy(4, 4), DType::scalar(DTypeAtom::U8), 11.0);
    let png = Codec::Png.encode(&tile).unwrap();
    tokio::spawn(serve(listener, vec![(vec![], png)]));

    let dataset = TiledDataset::open(TiledConfig {
        name: "tiles".into(),
        tiles: format!("http://{addr}/tiles"),
        tile_width: 4,
        tile_height: 4,
        nlevels: 1,
        compression: "png".into(),
        dtype: DType::scalar(DTypeAtom::U8),
    })
    .unwrap();
    let access = create_tile_access(&dataset, 1).unwrap();

    let mut query = BoxQuery::new(
        box_2d([0, 0], [8, 8]),
        dataset.field().clone(),
        0.0,
        Mode::Read,
        Aborted::new(),
    )
    .with_end_resolutions(vec![dataset.bits_per_block()]);
    begin_tiled_box_query(&dataset, &mut query).unwrap();
    execute_tiled_box_query(&dataset, &access, &mut query)
        .await
        .unwrap();

    let buffer = query.buffer.as_ref().unwrap();
    assert_eq!(buffer.dims(), PointN::xy(4, 4));
    assert!(buffer.as_bytes().iter().all(|&b| b == 11));
}
