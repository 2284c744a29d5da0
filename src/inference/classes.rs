// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vigil-rs

//! COCO class vocabulary and the class to event type mapping

use crate::events::EventType;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

const VEHICLES: [&str; 5] = ["car", "motorcycle", "bus", "train", "truck"];

const ANIMALS: [&str; 10] = [
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];

/// Event type for a detector class label
pub fn event_type_for(class_name: &str) -> EventType {
    if class_name == "person" {
        EventType::Person
    } else if VEHICLES.contains(&class_name) {
        EventType::Vehicle
    } else if ANIMALS.contains(&class_name) {
        EventType::Animal
    } else {
        EventType::Custom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping() {
        assert_eq!(event_type_for("person"), EventType::Person);
        assert_eq!(event_type_for("truck"), EventType::Vehicle);
        assert_eq!(event_type_for("giraffe"), EventType::Animal);
        assert_eq!(event_type_for("toothbrush"), EventType::Custom);
        assert_eq!(event_type_for("bicycle"), EventType::Custom);
    }

    #[test]
    fn test_vocabulary() {
        assert_eq!(COCO_CLASSES[0], "person");
        assert_eq!(COCO_CLASSES[79], "toothbrush");
    }
}
