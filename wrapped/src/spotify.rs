use serde::{Deserialize, Serialize};

/// Entities mirroring the Spotify API's JSON shapes. Fields that Spotify
/// omits on simplified objects (genres and popularity on track artists,
/// artists and images on some albums) fall back to empty defaults so one
/// set of structs covers both the full and simplified variants.

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub album: Album,
    pub artists: Vec<Artist>,
    pub popularity: u32,
    pub duration_ms: u32,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u32>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub album_type: String,
    pub release_date: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub external_urls: ExternalUrls,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    pub url: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExternalUrls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify: Option<String>,
}

#[cfg(test)]
mod test {
    use super::{Artist, Track};

    #[test]
    fn test_track_from_spotify_json() {
        let track: Track = serde_json::from_str(
            r#"{
                "id": "track123",
                "name": "Bohemian Rhapsody",
                "popularity": 95,
                "duration_ms": 354320,
                "preview_url": null,
                "external_urls": {"spotify": "https://open.spotify.com/track/track123"},
                "album": {
                    "id": "album456",
                    "name": "A Night at the Opera",
                    "album_type": "album",
                    "release_date": "1975-11-21",
                    "total_tracks": 12,
                    "images": [{"url": "https://i.scdn.co/image/a", "height": 640, "width": 640}],
                    "external_urls": {"spotify": "https://open.spotify.com/album/album456"}
                },
                "artists": [{
                    "id": "artist789",
                    "name": "Queen",
                    "external_urls": {"spotify": "https://open.spotify.com/artist/artist789"}
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(track.name, "Bohemian Rhapsody");
        assert_eq!(track.album.release_date, "1975-11-21");
        assert_eq!(track.artists.len(), 1);
        // Simplified track artists carry no genres or popularity
        assert!(track.artists[0].genres.is_empty());
        assert_eq!(track.artists[0].popularity, None);
        assert_eq!(
            track.external_urls.spotify.as_deref(),
            Some("https://open.spotify.com/track/track123")
        );
    }

    #[test]
    fn test_full_artist_from_spotify_json() {
        let artist: Artist = serde_json::from_str(
            r#"{
                "id": "artist789",
                "name": "Queen",
                "genres": ["classic rock", "glam rock"],
                "popularity": 82,
                "followers": {"total": 1},
                "external_urls": {"spotify": "https://open.spotify.com/artist/artist789"},
                "images": [{"url": "https://i.scdn.co/image/b", "height": null, "width": null}]
            }"#,
        )
        .unwrap();
        assert_eq!(artist.genres, ["classic rock", "glam rock"]);
        assert_eq!(artist.popularity, Some(82));
        assert_eq!(artist.images[0].height, None);
    }
}
